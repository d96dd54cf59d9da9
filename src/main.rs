//! inkread - handwritten document to text
//!
//! Reads a photographed page, finds its words, orders them into lines and
//! decodes each word with an ONNX sequence model.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use inkread::config::{self, AppConfig, PipelineConfig};
use inkread::vision::annotate::draw_layout;
use inkread::vision::{analyze_page, load_document, DocumentLayout, FailurePolicy, LineGrouping};

/// inkread - handwritten document recognition
#[derive(Parser, Debug)]
#[command(name = "inkread", version)]
#[command(about = "Turn photographed handwritten pages into text")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize the text of a document
    Recognize {
        /// Document image
        image: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        /// ONNX word model
        #[arg(long)]
        model: Option<PathBuf>,

        /// Word workers (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Per-word inference timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Fail the whole document on the first unreadable word
        #[arg(long)]
        abort_on_failure: bool,

        /// Print lines, words and boxes as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Print the detected word boxes and lines as JSON
    Regions {
        /// Document image
        image: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        /// Also write a copy of the document with the boxes drawn on it
        #[arg(long)]
        annotate: Option<PathBuf>,
    },

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Layout tunables shared by `recognize` and `regions`
#[derive(Args, Debug)]
struct LayoutArgs {
    /// How straight the writing is, 0-10 (higher groups lines more strictly)
    #[arg(long)]
    tolerance: Option<f32>,

    /// How closely the words are spaced, 0-10 (higher merges strokes less)
    #[arg(long)]
    dilation: Option<f32>,

    /// Line grouping strategy (anchor, running_mean)
    #[arg(long)]
    grouping: Option<LineGrouping>,
}

impl LayoutArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(t) = self.tolerance {
            config.recognition.tolerance_scale = Some(t);
        }
        if let Some(d) = self.dilation {
            config.recognition.dilation_scale = Some(d);
        }
        if let Some(g) = self.grouping {
            config.recognition.grouping = g;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries only results
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };

    match cli.command {
        Command::Recognize {
            image,
            layout,
            model,
            workers,
            timeout_ms,
            abort_on_failure,
            json,
        } => {
            let mut app_config = load_or_default(&config_path, cli.config.is_some())?;
            layout.apply(&mut app_config);
            if let Some(model) = model {
                app_config.model.path = Some(model);
            }
            if let Some(workers) = workers {
                app_config.runtime.workers = workers;
            }
            if let Some(ms) = timeout_ms {
                app_config.runtime.inference_timeout_ms = Some(ms);
            }
            if abort_on_failure {
                app_config.runtime.failure_policy = FailurePolicy::AbortDocument;
            }
            run_recognize(&image, &app_config, json)
        }
        Command::Regions {
            image,
            layout,
            annotate,
        } => {
            let mut app_config = load_or_default(&config_path, cli.config.is_some())?;
            layout.apply(&mut app_config);
            run_regions(&image, &app_config, annotate.as_deref())
        }
        Command::Config { action } => run_config(action, &config_path),
    }
}

/// Load the config file, falling back to defaults when the default file is absent
fn load_or_default(path: &Path, explicit: bool) -> Result<AppConfig> {
    if explicit || path.exists() {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

#[cfg(feature = "onnx")]
fn run_recognize(image_path: &Path, app_config: &AppConfig, json: bool) -> Result<()> {
    use inkread::storage::verify_sha256;
    use inkread::vision::{DocumentRecognizer, ModelContract, OnnxInferencer};
    use std::sync::Arc;

    let pipeline = PipelineConfig::from_settings(app_config)?;

    let model_path = app_config.model.resolve_path()?;
    if let Some(expected) = &app_config.model.sha256 {
        verify_sha256(&model_path, expected)?;
    }

    let vocabulary = app_config.model.vocabulary.clone().unwrap_or_default();
    let contract = ModelContract {
        classes: vocabulary.class_count(),
        ..ModelContract::default()
    };
    let inferencer = OnnxInferencer::load(&model_path, app_config.model.input_layout)?;
    let recognizer = DocumentRecognizer::new(Arc::new(inferencer), vocabulary, contract)?;

    let image = load_document(image_path)?;
    let document = recognizer
        .recognize_document(&image, &pipeline)
        .with_context(|| format!("Failed to recognize {}", image_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print!("{}", document.text());
    }
    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn run_recognize(_image_path: &Path, app_config: &AppConfig, _json: bool) -> Result<()> {
    // Surface configuration errors before the missing backend
    PipelineConfig::from_settings(app_config)?;
    anyhow::bail!(
        "inkread was built without the `onnx` feature; \
         rebuild with `--features onnx` to recognize text"
    )
}

#[derive(Serialize)]
struct RegionReport<'a> {
    width: u32,
    height: u32,
    tolerance: f64,
    iterations: u32,
    words: usize,
    layout: &'a DocumentLayout,
}

fn run_regions(image_path: &Path, app_config: &AppConfig, annotate: Option<&Path>) -> Result<()> {
    let pipeline = PipelineConfig::from_settings(app_config)?;
    let image = load_document(image_path)?;
    let page = analyze_page(&image, &pipeline)?;

    let report = RegionReport {
        width: image.width(),
        height: image.height(),
        tolerance: pipeline.tolerance,
        iterations: pipeline.iterations,
        words: page.layout.word_count(),
        layout: &page.layout,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(out) = annotate {
        draw_layout(&image, &page.layout, 2)
            .save(out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        info!("Annotated layout written to {:?}", out);
    }
    Ok(())
}

fn run_config(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let config = load_or_default(path, false)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // Mid-range scales so a fresh install can run without flags
            let mut config = AppConfig::default();
            config.recognition.tolerance_scale = Some(5.0);
            config.recognition.dilation_scale = Some(5.0);
            config::save_config(&config, path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
