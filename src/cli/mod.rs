//! Command-line interface for caption-tool.
//!
//! Two invocation shapes are accepted:
//!
//! ```text
//! caption-tool <inputFolder> <outputFolder> <word> <type>   # type: subject | style
//! caption-tool <inputFolder> <outputFolder> <word>          # legacy single-stage
//! ```
//!
//! With a type, identical folders select refine-only mode and distinct
//! folders select caption-and-refine. Without one, images are captioned,
//! prefixed with the trigger word and copied next to their caption.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::adapters::{GradioCaptioner, OpenAiRefiner};
use crate::config::{Credentials, Settings};
use crate::core::{select_mode, BatchJob, BatchProcessor, Mode, Role};
use crate::reporter::{Reporter, TracingReporter};

/// caption-tool - caption and trigger-word refinement for LoRA datasets
#[derive(Parser, Debug)]
#[command(name = "caption-tool")]
#[command(author, version, about, long_about = None)]
#[command(override_usage = "caption-tool <INPUT_FOLDER> <OUTPUT_FOLDER> <WORD> <TYPE>\n       \
                            caption-tool <INPUT_FOLDER> <OUTPUT_FOLDER> <WORD>")]
pub struct Cli {
    /// Folder containing .png/.jpg images
    pub input_folder: PathBuf,

    /// Folder receiving the .txt captions (same as input to refine in place)
    pub output_folder: PathBuf,

    /// Trigger word to put into every caption
    #[arg(allow_hyphen_values = true)]
    pub word: String,

    /// What the trigger word denotes; omit for the legacy single-stage mode
    #[arg(value_enum, value_name = "TYPE")]
    pub role: Option<Role>,

    /// Config file (defaults to the nearest .captionkit/config.yaml)
    #[arg(long, env = "CAPTIONKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds to wait after each file sent to the backends
    #[arg(long)]
    pub pacing_secs: Option<u64>,
}

impl Cli {
    /// Operating mode implied by the arguments
    pub fn mode(&self) -> Mode {
        select_mode(
            self.input_folder.as_os_str(),
            self.output_folder.as_os_str(),
            self.role,
        )
    }

    /// The batch job described by the arguments
    pub fn job(&self) -> BatchJob {
        BatchJob {
            input_dir: self.input_folder.clone(),
            output_dir: self.output_folder.clone(),
            trigger_word: self.word.clone(),
            mode: self.mode(),
        }
    }

    /// Apply flag overrides on top of loaded settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(pacing) = self.pacing_secs {
            settings.batch.pacing_seconds = pacing;
        }
    }

    /// Execute the run
    pub async fn execute(self, settings: Settings) -> Result<()> {
        let job = self.job();

        if job.mode == Mode::CaptionOnly && !job.input_dir.is_dir() {
            anyhow::bail!("Input folder does not exist: {}", job.input_dir.display());
        }

        let credentials = settings.credentials_for(job.mode)?;

        let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter);
        let processor = build_processor(&settings, &credentials, reporter.clone())?;

        info!(mode = %job.mode, word = %job.trigger_word, "Starting caption run");

        let report = processor
            .process_all(&job)
            .await
            .context("Caption run aborted")?;

        reporter.info(&report.summary());
        Ok(())
    }
}

/// Wire up the backends the credentials allow
pub fn build_processor(
    settings: &Settings,
    credentials: &Credentials,
    reporter: Arc<dyn Reporter>,
) -> Result<BatchProcessor> {
    let mut processor = BatchProcessor::new(reporter.clone()).with_pacing(settings.pacing());

    if let Some(token) = &credentials.caption_token {
        let captioner = GradioCaptioner::new(&settings.caption, token.clone(), reporter.clone())?;
        processor = processor.with_captioner(Arc::new(captioner));
    }

    if let Some(api_key) = &credentials.refine_api_key {
        let refiner = OpenAiRefiner::new(&settings.refine, api_key.clone(), reporter)?;
        processor = processor.with_refiner(Arc::new(refiner));
    }

    Ok(processor)
}
