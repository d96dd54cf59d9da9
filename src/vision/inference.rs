//! Sequence model boundary
//!
//! The recognizer treats the word model as an opaque function from a
//! normalized word image to a per-timestep class score matrix.

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::decoder::ClassProbabilityMatrix;
use super::error::{InferenceError, RecognitionError, Result};
use super::word::WordImage;

/// Tensor contract of the word sequence model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContract {
    /// Input image width in pixels
    pub input_width: u32,
    /// Input image height in pixels
    pub input_height: u32,
    /// Output timesteps per word
    pub timesteps: usize,
    /// Output classes per timestep, blank included
    pub classes: usize,
}

impl Default for ModelContract {
    fn default() -> Self {
        Self {
            input_width: 128,
            input_height: 32,
            timesteps: 64,
            classes: 80,
        }
    }
}

/// Input tensor layout of an exported word model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputLayout {
    /// `[1, H, W, 1]` (Keras exports)
    #[default]
    Nhwc,
    /// `[1, 1, H, W]` (PyTorch exports)
    Nchw,
    /// `[1, H, W]`
    Nhw,
}

impl InputLayout {
    /// Tensor shape for a `height x width` word image
    pub fn shape(&self, height: usize, width: usize) -> Vec<usize> {
        match self {
            InputLayout::Nhwc => vec![1, height, width, 1],
            InputLayout::Nchw => vec![1, 1, height, width],
            InputLayout::Nhw => vec![1, height, width],
        }
    }
}

/// Evaluates the word model on one prepared word image
///
/// Implementations must be callable from several threads at once when the
/// recognizer runs with more than one worker. A backend that serializes its
/// calls internally reports that through `max_concurrency`, and the recognizer
/// never runs more workers than that, so queueing on the backend does not eat
/// into the per-word timeout.
pub trait Inferencer: Send + Sync {
    fn run(&self, word: &WordImage) -> std::result::Result<ClassProbabilityMatrix, InferenceError>;

    /// Calls the backend can serve at once, `None` if unbounded
    fn max_concurrency(&self) -> Option<usize> {
        None
    }
}

impl<F> Inferencer for F
where
    F: Fn(&WordImage) -> std::result::Result<ClassProbabilityMatrix, InferenceError> + Send + Sync,
{
    fn run(&self, word: &WordImage) -> std::result::Result<ClassProbabilityMatrix, InferenceError> {
        self(word)
    }
}

/// Run inference, giving up after `timeout`
///
/// With a timeout the call runs on a helper thread; a late answer is
/// discarded when it eventually arrives.
pub fn run_with_timeout(
    inferencer: &Arc<dyn Inferencer>,
    word: WordImage,
    timeout: Option<Duration>,
) -> Result<ClassProbabilityMatrix> {
    let Some(timeout) = timeout else {
        return Ok(inferencer.run(&word)?);
    };

    let (tx, rx) = bounded(1);
    let inferencer = Arc::clone(inferencer);
    std::thread::Builder::new()
        .name("inkread-infer".into())
        .spawn(move || {
            let _ = tx.send(inferencer.run(&word));
        })
        .map_err(|e| InferenceError::Runtime(format!("failed to spawn inference thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => Ok(result?),
        Err(RecvTimeoutError::Timeout) => Err(RecognitionError::InferenceTimeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(InferenceError::Disconnected.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};
    use ndarray::Array2;

    fn blank_word() -> WordImage {
        let img: GrayImage = ImageBuffer::from_fn(128, 32, |_, _| Luma([255u8]));
        WordImage::from_gray(&img)
    }

    fn zeros(_: &WordImage) -> std::result::Result<ClassProbabilityMatrix, InferenceError> {
        Ok(ClassProbabilityMatrix::new(Array2::zeros((64, 80))))
    }

    #[test]
    fn test_closure_is_an_inferencer() {
        let inferencer: Arc<dyn Inferencer> = Arc::new(zeros);
        let out = run_with_timeout(&inferencer, blank_word(), None).unwrap();
        assert_eq!((out.timesteps(), out.classes()), (64, 80));
    }

    #[test]
    fn test_closures_have_no_concurrency_limit() {
        let inferencer: Arc<dyn Inferencer> = Arc::new(zeros);
        assert_eq!(inferencer.max_concurrency(), None);
    }

    #[test]
    fn test_fast_call_beats_timeout() {
        let inferencer: Arc<dyn Inferencer> = Arc::new(zeros);
        let out = run_with_timeout(&inferencer, blank_word(), Some(Duration::from_secs(5)));
        assert!(out.is_ok());
    }

    #[test]
    fn test_slow_call_times_out() {
        let inferencer: Arc<dyn Inferencer> = Arc::new(|w: &WordImage| {
            std::thread::sleep(Duration::from_millis(300));
            zeros(w)
        });
        let err = run_with_timeout(&inferencer, blank_word(), Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, RecognitionError::InferenceTimeout(_)));
    }

    #[test]
    fn test_backend_error_is_wrapped() {
        fn failing(_: &WordImage) -> std::result::Result<ClassProbabilityMatrix, InferenceError> {
            Err(InferenceError::Runtime("bad tensor".into()))
        }
        let inferencer: Arc<dyn Inferencer> = Arc::new(failing);
        let err = run_with_timeout(&inferencer, blank_word(), Some(Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, RecognitionError::Inference(InferenceError::Runtime(_))));
    }

    #[test]
    fn test_input_layout_shapes() {
        assert_eq!(InputLayout::default().shape(32, 128), vec![1, 32, 128, 1]);
        assert_eq!(InputLayout::Nchw.shape(32, 128), vec![1, 1, 32, 128]);
        assert_eq!(InputLayout::Nhw.shape(32, 128), vec![1, 32, 128]);
    }

    #[test]
    fn test_default_contract_matches_reference_model() {
        let contract = ModelContract::default();
        assert_eq!((contract.input_width, contract.input_height), (128, 32));
        assert_eq!((contract.timesteps, contract.classes), (64, 80));
    }
}
