//! Domain types for the caption pipeline.
//!
//! - Image: candidate images discovered in the input folder
//! - Report: per-file outcomes and the run summary

pub mod image;
pub mod report;

// Re-export commonly used types
pub use image::{is_candidate_name, ImageRecord, IMAGE_EXTENSIONS};
pub use report::{BatchReport, FileOutcome, FileReport, SkipReason, Stage};
