//! Error types for the document-to-text pipeline

use thiserror::Error;

/// Errors surfaced by the recognition pipeline
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Source image is empty or could not be decoded
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A required tunable was not set before the run
    #[error("Configuration missing: {0} must be set before recognition")]
    ConfigurationMissing(&'static str),

    /// A tunable was set to a value that cannot be used
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Model output does not match the expected tensor shape
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// A decoded class index has no vocabulary entry and is not the blank
    #[error("Class index {index} is outside the vocabulary ({classes} classes incl. blank)")]
    UnknownClass { index: usize, classes: usize },

    /// The sequence model failed for one word
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// The sequence model did not answer within the per-word budget
    #[error("Inference timed out after {0:?}")]
    InferenceTimeout(std::time::Duration),

    /// The document run was cancelled between words
    #[error("Recognition cancelled")]
    Cancelled,
}

impl From<image::ImageError> for RecognitionError {
    fn from(e: image::ImageError) -> Self {
        RecognitionError::InvalidImage(e.to_string())
    }
}

/// Error returned by an [`Inferencer`](super::inference::Inferencer) implementation
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The backend could not be initialized or is not loaded
    #[error("Model not available: {0}")]
    NotAvailable(String),

    /// The backend raised an error while evaluating the model
    #[error("Model runtime error: {0}")]
    Runtime(String),

    /// Worker thread running the model went away without answering
    #[error("Inference worker disconnected")]
    Disconnected,
}

pub type Result<T, E = RecognitionError> = std::result::Result<T, E>;
