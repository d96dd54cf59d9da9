//! Document recognition pipeline
//!
//! preprocess -> detect regions -> cluster into lines -> per word:
//! crop/rescale -> model -> greedy decode -> assemble text in reading order.

use crossbeam_channel::unbounded;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decoder::{SequenceDecoder, Vocabulary};
use super::error::{RecognitionError, Result};
use super::image_ops::{detect_regions, preprocess};
use super::inference::{run_with_timeout, Inferencer, ModelContract};
use super::layout::{cluster_into_lines, BoundingBox, DocumentLayout};
use super::word::prepare_word;
use crate::config::PipelineConfig;

/// What a failed word does to the rest of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Replace the word with the placeholder and keep going
    #[default]
    SkipAndContinue,
    /// Stop and report the first failed word
    AbortDocument,
}

/// Execution options for the per-word stage
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOptions {
    /// Concurrent word workers; 1 runs on the calling thread
    pub workers: usize,
    /// Per-word inference budget
    pub inference_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    /// Text substituted for a failed word
    pub placeholder: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            inference_timeout: None,
            failure_policy: FailurePolicy::SkipAndContinue,
            placeholder: "[?]".to_string(),
        }
    }
}

/// One recognized word
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedWord {
    /// Where the word sits on the page
    pub bounds: BoundingBox,
    /// Decoded text, or the placeholder if recognition failed
    pub text: String,
    /// Whether the placeholder was substituted
    pub failed: bool,
}

/// One line of recognized words, left to right
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognizedLine {
    pub words: Vec<RecognizedWord>,
}

/// Result of recognizing a whole document
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecognizedDocument {
    /// Lines, top to bottom
    pub lines: Vec<RecognizedLine>,
    /// Number of words replaced by the placeholder
    pub failed_words: usize,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RecognizedDocument {
    /// Words joined by single spaces, every line terminated by `\n`
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let words: Vec<&str> = line.words.iter().map(|w| w.text.as_str()).collect();
            out.push_str(&words.join(" "));
            out.push('\n');
        }
        out
    }

    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.words.len()).sum()
    }
}

/// Binarized page plus its word layout
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub binary: GrayImage,
    pub layout: DocumentLayout,
}

/// Run the layout stages (binarize, detect, cluster) on a document
pub fn analyze_page(image: &DynamicImage, config: &PipelineConfig) -> Result<PageAnalysis> {
    let binary = preprocess(image, &config.preprocess)?;
    let boxes = detect_regions(&binary, config.iterations, config.preprocess.min_region_area)?;
    let layout = cluster_into_lines(&boxes, config.tolerance, config.grouping);

    info!(
        "Page layout: {} words on {} lines ({}x{})",
        layout.word_count(),
        layout.lines.len(),
        binary.width(),
        binary.height()
    );

    Ok(PageAnalysis { binary, layout })
}

/// Turns document images into text using an injected word model
pub struct DocumentRecognizer {
    inferencer: Arc<dyn Inferencer>,
    decoder: SequenceDecoder,
    contract: ModelContract,
}

impl DocumentRecognizer {
    /// Create a recognizer; the vocabulary must match the model's class count
    pub fn new(
        inferencer: Arc<dyn Inferencer>,
        vocabulary: Vocabulary,
        contract: ModelContract,
    ) -> Result<Self> {
        if vocabulary.class_count() != contract.classes {
            return Err(RecognitionError::InvalidConfiguration(format!(
                "vocabulary has {} classes (blank included) but the model emits {}",
                vocabulary.class_count(),
                contract.classes
            )));
        }

        Ok(Self {
            inferencer,
            decoder: SequenceDecoder::new(vocabulary).with_timesteps(contract.timesteps),
            contract,
        })
    }

    pub fn contract(&self) -> &ModelContract {
        &self.contract
    }

    /// Recognize a full document
    pub fn recognize_document(
        &self,
        image: &DynamicImage,
        config: &PipelineConfig,
    ) -> Result<RecognizedDocument> {
        self.recognize_document_with_cancel(image, config, &CancellationToken::new())
    }

    /// Recognize a full document and render it as plain text
    pub fn recognize_text(&self, image: &DynamicImage, config: &PipelineConfig) -> Result<String> {
        Ok(self.recognize_document(image, config)?.text())
    }

    /// Recognize a full document, stopping between words once `cancel` fires
    pub fn recognize_document_with_cancel(
        &self,
        image: &DynamicImage,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<RecognizedDocument> {
        let start = Instant::now();
        let page = analyze_page(image, config)?;
        let mut document =
            self.recognize_layout(&page.binary, &page.layout, &config.runtime, cancel)?;
        document.elapsed = start.elapsed();

        info!(
            "Recognized {} words on {} lines in {:?} ({} failed)",
            document.word_count(),
            document.lines.len(),
            document.elapsed,
            document.failed_words
        );

        Ok(document)
    }

    /// Recognize every word of an already analyzed page
    pub fn recognize_layout(
        &self,
        page: &GrayImage,
        layout: &DocumentLayout,
        runtime: &RuntimeOptions,
        cancel: &CancellationToken,
    ) -> Result<RecognizedDocument> {
        if layout.is_empty() {
            debug!("No word regions detected, nothing to recognize");
            return Ok(RecognizedDocument::default());
        }

        let boxes: Vec<BoundingBox> = layout.words().map(|(_, b)| *b).collect();
        let workers = self.worker_count(runtime.workers).min(boxes.len());
        let outcomes = if workers <= 1 {
            self.recognize_sequential(page, &boxes, runtime, cancel)?
        } else {
            self.recognize_parallel(page, &boxes, workers, runtime, cancel)?
        };

        let mut failed_words = 0;
        let mut outcomes = outcomes.into_iter();
        let mut lines = Vec::with_capacity(layout.lines.len());

        for line in &layout.lines {
            let mut words = Vec::with_capacity(line.len());
            for &bounds in &line.words {
                let Some(outcome) = outcomes.next() else {
                    return Err(RecognitionError::Cancelled);
                };
                let word = settle(bounds, outcome, runtime)?;
                if word.failed {
                    failed_words += 1;
                }
                words.push(word);
            }
            lines.push(RecognizedLine { words });
        }

        Ok(RecognizedDocument {
            lines,
            failed_words,
            elapsed: Duration::ZERO,
        })
    }

    /// Requested workers, capped by what the backend can serve at once
    fn worker_count(&self, requested: usize) -> usize {
        match self.inferencer.max_concurrency() {
            Some(limit) if limit.max(1) < requested => {
                debug!("Backend serves {} call(s) at once, capping workers", limit);
                limit.max(1)
            }
            _ => requested,
        }
    }

    fn recognize_word(
        &self,
        page: &GrayImage,
        bounds: &BoundingBox,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let word = prepare_word(
            page,
            bounds,
            self.contract.input_width,
            self.contract.input_height,
        )?;
        let scores = run_with_timeout(&self.inferencer, word, timeout)?;
        self.decoder.decode(&scores)
    }

    fn recognize_sequential(
        &self,
        page: &GrayImage,
        boxes: &[BoundingBox],
        runtime: &RuntimeOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<String>>> {
        let mut outcomes = Vec::with_capacity(boxes.len());
        for bounds in boxes {
            if cancel.is_cancelled() {
                return Err(RecognitionError::Cancelled);
            }
            match self.recognize_word(page, bounds, runtime.inference_timeout) {
                Err(e) if runtime.failure_policy == FailurePolicy::AbortDocument => return Err(e),
                outcome => outcomes.push(outcome),
            }
        }
        Ok(outcomes)
    }

    /// Fan words out over a worker pool and put the answers back in reading order
    fn recognize_parallel(
        &self,
        page: &GrayImage,
        boxes: &[BoundingBox],
        workers: usize,
        runtime: &RuntimeOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<String>>> {
        let abort_on_failure = runtime.failure_policy == FailurePolicy::AbortDocument;
        // Stops the pool on cancellation, or under AbortDocument once a failure
        // is reached in reading order
        let stop = cancel.child_token();
        let mut slots: Vec<Option<Result<String>>> = (0..boxes.len()).map(|_| None).collect();

        debug!("Recognizing {} words on {} workers", boxes.len(), workers);

        let (job_tx, job_rx) = unbounded::<(usize, BoundingBox)>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<String>)>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let stop = &stop;
                scope.spawn(move || {
                    for (index, bounds) in job_rx.iter() {
                        if stop.is_cancelled() {
                            break;
                        }
                        let outcome = self.recognize_word(page, &bounds, runtime.inference_timeout);
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (index, bounds) in boxes.iter().enumerate() {
                // Receiver lives until the scope ends, so this cannot fail
                let _ = job_tx.send((index, *bounds));
            }
            drop(job_tx);

            // Length of the reading-order prefix whose words have all finished
            let mut settled = 0;
            for (index, outcome) in result_rx.iter() {
                slots[index] = Some(outcome);
                while let Some(Some(outcome)) = slots.get(settled) {
                    // Every earlier word has finished, so this is the first failure
                    if abort_on_failure && outcome.is_err() {
                        stop.cancel();
                    }
                    settled += 1;
                }
            }
        });

        if cancel.is_cancelled() {
            return Err(RecognitionError::Cancelled);
        }

        if abort_on_failure {
            // Only words after the first failure can have been skipped
            if let Some(i) = slots.iter().position(|slot| matches!(slot, Some(Err(_)))) {
                if let Some(Err(e)) = slots.swap_remove(i) {
                    return Err(e);
                }
            }
        }

        // Workers only skip jobs after a stop, so every slot is filled here
        slots
            .into_iter()
            .map(|slot| slot.ok_or(RecognitionError::Cancelled))
            .collect()
    }
}

/// Apply the failure policy to one word outcome
fn settle(
    bounds: BoundingBox,
    outcome: Result<String>,
    runtime: &RuntimeOptions,
) -> Result<RecognizedWord> {
    match outcome {
        Ok(text) => Ok(RecognizedWord {
            bounds,
            text,
            failed: false,
        }),
        Err(e) => match runtime.failure_policy {
            FailurePolicy::AbortDocument => Err(e),
            FailurePolicy::SkipAndContinue => {
                warn!("Word at ({}, {}) failed: {}", bounds.x, bounds.y, e);
                Ok(RecognizedWord {
                    bounds,
                    text: runtime.placeholder.clone(),
                    failed: true,
                })
            }
        },
    }
}
