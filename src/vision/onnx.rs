//! ONNX Runtime word model backend

use anyhow::{Context, Result};
use ndarray::ArrayD;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::decoder::ClassProbabilityMatrix;
use super::error::InferenceError;
use super::inference::{Inferencer, InputLayout};
use super::word::WordImage;

/// Word sequence model loaded into an ONNX Runtime session
pub struct OnnxInferencer {
    // Session::run needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    layout: InputLayout,
}

impl OnnxInferencer {
    /// Load a model file
    pub fn load(model_path: &Path, layout: InputLayout) -> Result<Self> {
        if !model_path.is_file() {
            return Err(InferenceError::NotAvailable(format!(
                "no model at {} (set [model].path or pass --model)",
                model_path.display()
            ))
            .into());
        }

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;
        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        info!(
            "Model loaded. Input: {}, Outputs: {:?}, layout: {:?}",
            input_name, output_names, layout
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            layout,
        })
    }
}

impl Inferencer for OnnxInferencer {
    fn run(&self, word: &WordImage) -> std::result::Result<ClassProbabilityMatrix, InferenceError> {
        let shape = self.layout.shape(word.height(), word.width());
        let input = ArrayD::from_shape_vec(shape, word.to_flat())
            .map_err(|e| InferenceError::Runtime(format!("input tensor: {e}")))?;
        let input_value = Value::from_array(input)
            .map_err(|e| InferenceError::Runtime(format!("input tensor: {e}")))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| InferenceError::Runtime(format!("inference failed: {e}")))?;

        let scores = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| InferenceError::Runtime(format!("output tensor: {e}")))?
            .to_owned();
        debug!("Model output shape: {:?}", scores.shape());

        ClassProbabilityMatrix::from_tensor(scores)
            .map_err(|e| InferenceError::Runtime(e.to_string()))
    }

    fn max_concurrency(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_not_available() {
        let err = OnnxInferencer::load(Path::new("/nonexistent/model.onnx"), InputLayout::Nhwc)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<InferenceError>(),
            Some(InferenceError::NotAvailable(_))
        ));
    }
}
