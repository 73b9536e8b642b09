//! Batch processor: walks an input folder and captions every eligible image.
//!
//! Files are handled strictly one at a time in directory-listing order. The
//! caption file in the output folder is both the result and the resume
//! marker: a file whose caption exists is skipped (or, in refine-only mode,
//! is the input). A failure on one file is recorded and the loop moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tracing::instrument;

use crate::adapters::{Captioner, Refiner};
use crate::domain::{is_candidate_name, BatchReport, FileOutcome, ImageRecord, SkipReason, Stage};
use crate::reporter::Reporter;

use super::mode::{Mode, Role};

/// Default delay after each file that reached a backend
pub const DEFAULT_PACING: Duration = Duration::from_secs(60);

/// Run-level errors. Per-file problems never surface here.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to read input folder {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create output folder {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mode {mode} needs a {backend} backend but none was configured")]
    MissingBackend { mode: Mode, backend: &'static str },
}

/// Parameters of one batch run
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub trigger_word: String,
    pub mode: Mode,
}

/// The backends a mode actually uses, resolved once per run
enum Plan<'a> {
    RefineOnly {
        refiner: &'a dyn Refiner,
        role: Role,
    },
    CaptionAndRefine {
        captioner: &'a dyn Captioner,
        refiner: &'a dyn Refiner,
        role: Role,
    },
    CaptionOnly {
        captioner: &'a dyn Captioner,
    },
}

/// Sequential caption pipeline over a folder of images
pub struct BatchProcessor {
    captioner: Option<Arc<dyn Captioner>>,
    refiner: Option<Arc<dyn Refiner>>,
    reporter: Arc<dyn Reporter>,
    pacing: Duration,
}

impl BatchProcessor {
    /// Create a processor with no backends and the default pacing
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            captioner: None,
            refiner: None,
            reporter,
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn Refiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    /// Delay after each file that reached a backend (refining modes only)
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Process every candidate image in `job.input_dir`
    #[instrument(skip_all, fields(mode = %job.mode, input = %job.input_dir.display()))]
    pub async fn process_all(&self, job: &BatchJob) -> Result<BatchReport, BatchError> {
        let plan = self.plan(job.mode)?;

        self.reporter.step(&format!(
            "Processing {} in {} mode",
            job.input_dir.display(),
            job.mode
        ));

        let images = match self.enumerate(&job.input_dir).await {
            Ok(images) => images,
            Err(source) => {
                let err = BatchError::Enumerate {
                    path: job.input_dir.clone(),
                    source,
                };
                self.reporter.error(&format!("Error processing images: {}", err));
                return Err(err);
            }
        };

        if let Err(source) = fs::create_dir_all(&job.output_dir).await {
            let err = BatchError::CreateOutput {
                path: job.output_dir.clone(),
                source,
            };
            self.reporter.error(&format!("Error processing images: {}", err));
            return Err(err);
        }

        let mut report = BatchReport::new(job.mode);

        for image in images {
            let outcome = self.process_one(&plan, &image, job).await;
            self.report_outcome(&image, &outcome, job);

            let pace = job.mode.is_paced() && outcome.reached_backend();
            report.record(image.file_name.clone(), outcome);

            if pace && !self.pacing.is_zero() {
                self.reporter.info(&format!(
                    "Waiting {}s before the next file",
                    self.pacing.as_secs_f64()
                ));
                tokio::time::sleep(self.pacing).await;
            }
        }

        report.finish();
        self.reporter.success(&format!(
            "Finished: {} written, {} skipped, {} failed",
            report.written(),
            report.skipped(),
            report.failed()
        ));

        Ok(report)
    }

    fn plan(&self, mode: Mode) -> Result<Plan<'_>, BatchError> {
        Ok(match mode {
            Mode::RefineOnly { role } => Plan::RefineOnly {
                refiner: self.refiner_for(mode)?,
                role,
            },
            Mode::CaptionAndRefine { role } => Plan::CaptionAndRefine {
                captioner: self.captioner_for(mode)?,
                refiner: self.refiner_for(mode)?,
                role,
            },
            Mode::CaptionOnly => Plan::CaptionOnly {
                captioner: self.captioner_for(mode)?,
            },
        })
    }

    fn captioner_for(&self, mode: Mode) -> Result<&dyn Captioner, BatchError> {
        self.captioner
            .as_deref()
            .ok_or(BatchError::MissingBackend {
                mode,
                backend: "captioning",
            })
    }

    fn refiner_for(&self, mode: Mode) -> Result<&dyn Refiner, BatchError> {
        self.refiner.as_deref().ok_or(BatchError::MissingBackend {
            mode,
            backend: "refinement",
        })
    }

    /// List candidate images in directory order
    async fn enumerate(&self, dir: &Path) -> std::io::Result<Vec<ImageRecord>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut images = Vec::new();
        let mut total = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            total += 1;
            let path = entry.path();

            let Some(image) = ImageRecord::from_path(path.clone()) else {
                let name = entry.file_name();
                if name.to_str().is_none() && is_candidate_name(&name.to_string_lossy()) {
                    self.reporter
                        .warn(&format!("Skipping non UTF-8 file name: {}", path.display()));
                }
                continue;
            };

            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => images.push(image),
                Ok(_) => {}
                Err(e) => self
                    .reporter
                    .warn(&format!("Cannot stat {}: {}", path.display(), e)),
            }
        }

        self.reporter.info(&format!(
            "Found {} files in folder {}, {} images",
            total,
            dir.display(),
            images.len()
        ));

        Ok(images)
    }

    async fn process_one(
        &self,
        plan: &Plan<'_>,
        image: &ImageRecord,
        job: &BatchJob,
    ) -> FileOutcome {
        let artifact = image.artifact_path(&job.output_dir);

        match *plan {
            Plan::RefineOnly { refiner, role } => {
                if !artifact_exists(&artifact).await {
                    return FileOutcome::Skipped(SkipReason::NoCaption);
                }

                let existing = match fs::read_to_string(&artifact).await {
                    Ok(text) => text,
                    Err(e) => return failed(Stage::ReadCaption, e),
                };

                let refined = match refiner.refine(&job.trigger_word, &existing, role).await {
                    Ok(text) => text,
                    Err(e) => return failed(Stage::Refine, e),
                };

                write_outcome(&artifact, &refined).await
            }

            Plan::CaptionAndRefine {
                captioner,
                refiner,
                role,
            } => {
                if artifact_exists(&artifact).await {
                    return FileOutcome::Skipped(SkipReason::ArtifactExists);
                }

                let caption = match self.caption_image(captioner, image).await {
                    Ok(text) => text,
                    Err(outcome) => return outcome,
                };

                let refined = match refiner.refine(&job.trigger_word, &caption, role).await {
                    Ok(text) => text,
                    Err(e) => return failed(Stage::Refine, e),
                };

                write_outcome(&artifact, &refined).await
            }

            Plan::CaptionOnly { captioner } => {
                if artifact_exists(&artifact).await {
                    return FileOutcome::Skipped(SkipReason::ArtifactExists);
                }

                let caption = match self.caption_image(captioner, image).await {
                    Ok(text) => text,
                    Err(outcome) => return outcome,
                };

                // the image copy goes first; the caption file marks completion
                let copy = image.copy_path(&job.output_dir);
                if !is_same_file(&image.path, &copy).await {
                    if let Err(e) = fs::copy(&image.path, &copy).await {
                        return failed(Stage::CopyImage, e);
                    }
                }

                let prefixed = format!("{} {}", job.trigger_word, caption);
                write_outcome(&artifact, &prefixed).await
            }
        }
    }

    async fn caption_image(
        &self,
        captioner: &dyn Captioner,
        image: &ImageRecord,
    ) -> Result<String, FileOutcome> {
        let bytes = image
            .read_bytes()
            .await
            .map_err(|e| failed(Stage::ReadImage, e))?;

        captioner
            .caption(bytes, &image.file_name)
            .await
            .map_err(|e| failed(Stage::Caption, e))
    }

    fn report_outcome(&self, image: &ImageRecord, outcome: &FileOutcome, job: &BatchJob) {
        match outcome {
            FileOutcome::Written => self.reporter.success(&format!(
                "Wrote caption for {} to {}",
                image.file_name,
                image.artifact_path(&job.output_dir).display()
            )),
            FileOutcome::Skipped(SkipReason::ArtifactExists) => self.reporter.info(&format!(
                "Caption already exists for {}, skipping",
                image.file_name
            )),
            FileOutcome::Skipped(SkipReason::NoCaption) => self.reporter.info(&format!(
                "No caption file for {} in {}, skipping",
                image.file_name,
                job.output_dir.display()
            )),
            FileOutcome::Failed { stage, error } => self.reporter.warn(&format!(
                "{}: {} failed, skipping: {}",
                image.file_name, stage, error
            )),
        }
    }
}

fn failed(stage: Stage, error: impl std::fmt::Display) -> FileOutcome {
    FileOutcome::Failed {
        stage,
        error: error.to_string(),
    }
}

async fn write_outcome(artifact: &Path, text: &str) -> FileOutcome {
    match write_artifact(artifact, text).await {
        Ok(()) => FileOutcome::Written,
        Err(e) => failed(Stage::WriteArtifact, e),
    }
}

/// A missing or unreadable location counts as "no artifact"
async fn artifact_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Write through a sibling temp file so a partial write is never mistaken
/// for a finished caption
async fn write_artifact(path: &Path, text: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, text).await?;

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
