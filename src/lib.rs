//! inkread - handwritten document recognition
//!
//! Binarizes a page, segments it into word regions, orders them into lines
//! and decodes each word with a sequence model.

pub mod config;
pub mod storage;
pub mod vision;

pub use config::{AppConfig, PipelineConfig};
pub use vision::{DocumentRecognizer, RecognitionError, RecognizedDocument};
