//! captionkit - caption-refinement batch pipeline for LoRA datasets
//!
//! Walks a folder of images, obtains a caption for each (from a Gradio
//! captioning app, or from a caption file already on disk), rewrites it
//! with a chat-completion model so it carries a trigger word, and stores
//! the result as `<image stem>.txt` in the output folder.
//!
//! # Architecture
//!
//! The caption file is the only state:
//! - An image whose caption file exists is done and is skipped on rerun
//! - Files are processed one at a time, so an interrupted run resumes
//!   from the first image without a caption
//! - A failure on one image is logged and never stops the batch
//!
//! # Modules
//!
//! - `adapters`: Backend clients (Gradio captioning, chat-completion refinement)
//! - `core`: Mode selection and the batch processor
//! - `domain`: Data structures (ImageRecord, BatchReport)
//! - `reporter`: Logging capability injected into the pipeline
//! - `config`: Settings resolved at startup
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Caption images in ./raw, refine with a subject trigger word into ./dataset
//! caption-tool raw dataset ohwx subject
//!
//! # Refine captions already sitting next to the images
//! caption-tool dataset dataset ohwx style
//!
//! # Legacy: caption, prefix the trigger word, copy images alongside
//! caption-tool raw dataset ohwx
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod reporter;

// Re-export main types at crate root for convenience
pub use adapters::{BackendError, Captioner, GradioCaptioner, OpenAiRefiner, Refiner};
pub use config::Settings;
pub use crate::core::{select_mode, BatchError, BatchJob, BatchProcessor, Mode, Role};
pub use domain::{BatchReport, FileOutcome, ImageRecord, SkipReason, Stage};
pub use reporter::{Level, MemoryReporter, Reporter, TracingReporter};
