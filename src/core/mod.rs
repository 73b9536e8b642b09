//! Core pipeline logic.
//!
//! This module contains:
//! - Mode: operating modes, semantic roles and mode selection
//! - Processor: the sequential per-file caption pipeline

pub mod mode;
pub mod processor;

// Re-export commonly used types
pub use mode::{select_mode, Mode, Role};
pub use processor::{BatchError, BatchJob, BatchProcessor, DEFAULT_PACING};
