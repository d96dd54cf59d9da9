//! Recognition Configuration
//!
//! User-facing scales, the parameters they map to, and the TOML settings file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::vision::decoder::Vocabulary;
use crate::vision::error::RecognitionError;
use crate::vision::image_ops::PreprocessOptions;
use crate::vision::inference::InputLayout;
use crate::vision::layout::LineGrouping;
use crate::vision::pipeline::{FailurePolicy, RuntimeOptions};

/// Lower bound of the user-facing scales
pub const SCALE_MIN: f32 = 0.0;
/// Upper bound of the user-facing scales
pub const SCALE_MAX: f32 = 10.0;

fn clamp_scale(scale: f32) -> f64 {
    scale.clamp(SCALE_MIN, SCALE_MAX) as f64
}

/// Line grouping tolerance for a `[0, 10]` scale, in `[0.7, 2.7]`
///
/// Higher scale means stricter grouping (smaller tolerance).
pub fn tolerance_from_scale(scale: f32) -> f64 {
    let s = clamp_scale(scale);
    0.7 + (2.0 - s / 5.0)
}

/// Dilation passes for a `[0, 10]` scale, in `[10, 25]`
///
/// Higher scale means less merging of neighbouring strokes.
pub fn iterations_from_scale(scale: f32) -> u32 {
    let s = clamp_scale(scale);
    10 + (15.0 - 1.5 * s).floor() as u32
}

/// Validated parameters for one recognition run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Vertical grouping tolerance, as a multiple of the reference box height
    pub tolerance: f64,
    /// Dilation passes used to merge strokes into words
    pub iterations: u32,
    pub grouping: LineGrouping,
    pub preprocess: PreprocessOptions,
    pub runtime: RuntimeOptions,
}

impl PipelineConfig {
    /// Build from the two user-facing scales with default everything else
    pub fn from_scales(
        tolerance_scale: f32,
        dilation_scale: f32,
    ) -> Result<Self, RecognitionError> {
        Self::from_settings(&AppConfig {
            recognition: RecognitionSettings {
                tolerance_scale: Some(tolerance_scale),
                dilation_scale: Some(dilation_scale),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    /// Validate the application settings once, at the call boundary
    pub fn from_settings(config: &AppConfig) -> Result<Self, RecognitionError> {
        let tolerance_scale = require_scale(config.recognition.tolerance_scale, "tolerance_scale")?;
        let dilation_scale = require_scale(config.recognition.dilation_scale, "dilation_scale")?;
        config.preprocessing.validate()?;

        Ok(Self {
            tolerance: tolerance_from_scale(tolerance_scale),
            iterations: iterations_from_scale(dilation_scale),
            grouping: config.recognition.grouping,
            preprocess: config.preprocessing.clone(),
            runtime: config.runtime.to_options(),
        })
    }
}

fn require_scale(value: Option<f32>, name: &'static str) -> Result<f32, RecognitionError> {
    match value {
        None => Err(RecognitionError::ConfigurationMissing(name)),
        Some(v) if v.is_nan() => Err(RecognitionError::InvalidConfiguration(format!(
            "{name} is not a number"
        ))),
        Some(v) => Ok(v),
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Layout tunables
    pub recognition: RecognitionSettings,
    /// Binarization and detection parameters
    pub preprocessing: PreprocessOptions,
    /// Worker and failure handling
    pub runtime: RuntimeSettings,
    /// Word model location and format
    pub model: ModelSettings,
}

/// The two user-facing scales; both must be set before recognition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// How straight the writing is, `[0, 10]` (higher = straighter lines)
    pub tolerance_scale: Option<f32>,
    /// How far apart words are, `[0, 10]` (higher = words written closer together)
    pub dilation_scale: Option<f32>,
    /// Line grouping strategy
    pub grouping: LineGrouping,
}

/// Runtime settings as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Word workers (0 = one per available core)
    pub workers: usize,
    /// Per-word inference budget in milliseconds
    pub inference_timeout_ms: Option<u64>,
    /// What a failed word does to the document
    pub failure_policy: FailurePolicy,
    /// Text substituted for failed words
    pub placeholder: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let defaults = RuntimeOptions::default();
        Self {
            workers: defaults.workers,
            inference_timeout_ms: None,
            failure_policy: defaults.failure_policy,
            placeholder: defaults.placeholder,
        }
    }
}

impl RuntimeSettings {
    fn to_options(&self) -> RuntimeOptions {
        let workers = if self.workers == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.workers
        };
        RuntimeOptions {
            workers,
            inference_timeout: self.inference_timeout_ms.map(Duration::from_millis),
            failure_policy: self.failure_policy,
            placeholder: self.placeholder.clone(),
        }
    }
}

/// Word model settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Path to the ONNX word model
    pub path: Option<PathBuf>,
    /// Expected SHA-256 of the model file (hex)
    pub sha256: Option<String>,
    /// Tensor layout the model expects its input in
    pub input_layout: InputLayout,
    /// Output alphabet, in class order (defaults to the built-in charset)
    pub vocabulary: Option<Vocabulary>,
}

/// File name of the word model inside the data directory
pub const DEFAULT_MODEL_FILE: &str = "model.onnx";

impl ModelSettings {
    /// Configured model path, or `model.onnx` in the application data directory
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.path_in(&crate::storage::get_data_dir()?)),
        }
    }

    fn path_in(&self, data_dir: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir.join(DEFAULT_MODEL_FILE))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Location of the default config file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}
