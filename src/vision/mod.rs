//! Vision Layer
//!
//! Turns a photographed handwritten page into text:
//! - Binarization and word region detection (`image_ops`)
//! - Line clustering and reading order (`layout`)
//! - Word cropping and normalization (`word`)
//! - Word model boundary and ONNX backend (`inference`, `onnx`)
//! - Greedy CTC decoding (`decoder`)
//! - End-to-end orchestration (`pipeline`)
//! - Box overlays for inspection (`annotate`)

pub mod annotate;
pub mod decoder;
pub mod error;
pub mod image_ops;
pub mod inference;
pub mod layout;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod word;

pub use decoder::{ClassProbabilityMatrix, SequenceDecoder, Vocabulary, DEFAULT_CHARSET};
pub use error::{InferenceError, RecognitionError};
pub use image_ops::{detect_regions, load_document, preprocess, PreprocessOptions};
pub use inference::{Inferencer, InputLayout, ModelContract};
pub use layout::{cluster_into_lines, BoundingBox, DocumentLayout, Line, LineGrouping};
#[cfg(feature = "onnx")]
pub use onnx::OnnxInferencer;
pub use pipeline::{
    analyze_page, DocumentRecognizer, FailurePolicy, PageAnalysis, RecognizedDocument,
    RecognizedLine, RecognizedWord, RuntimeOptions,
};
pub use word::{prepare_word, WordImage};
