//! Per-file outcomes and the run summary.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::Mode;

/// Where in the per-file pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadImage,
    ReadCaption,
    Caption,
    Refine,
    CopyImage,
    WriteArtifact,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::ReadImage => "read image",
            Stage::ReadCaption => "read caption",
            Stage::Caption => "caption",
            Stage::Refine => "refine",
            Stage::CopyImage => "copy image",
            Stage::WriteArtifact => "write caption",
        };
        f.write_str(s)
    }
}

/// Why a file was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Caption file already present (resume)
    ArtifactExists,

    /// Refine-only mode found no caption to refine
    NoCaption,
}

/// What happened to one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Written,
    Skipped(SkipReason),
    Failed { stage: Stage, error: String },
}

impl FileOutcome {
    /// True if at least one backend call was issued for the file
    pub fn reached_backend(&self) -> bool {
        match self {
            FileOutcome::Written => true,
            FileOutcome::Skipped(_) => false,
            FileOutcome::Failed { stage, .. } => {
                !matches!(stage, Stage::ReadImage | Stage::ReadCaption)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file_name: String,
    pub outcome: FileOutcome,
}

/// Result of one batch run
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Files in processing order
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn new(mode: Mode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            files: Vec::new(),
        }
    }

    pub fn record(&mut self, file_name: impl Into<String>, outcome: FileOutcome) {
        self.files.push(FileReport {
            file_name: file_name.into(),
            outcome,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Written))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    /// Outcome recorded for a file name
    pub fn outcome_for(&self, file_name: &str) -> Option<&FileOutcome> {
        self.files
            .iter()
            .find(|f| f.file_name == file_name)
            .map(|f| &f.outcome)
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    /// Multi-line session summary
    pub fn summary(&self) -> String {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        let duration = (end - self.started_at).num_milliseconds() as f64 / 1000.0;

        format!(
            "Caption session summary\n\
             Run: {}\n\
             Mode: {}\n\
             Start: {}\n\
             End: {}\n\
             Duration: {:.1}s\n\
             Files: {} discovered, {} written, {} skipped, {} failed",
            self.run_id,
            self.mode,
            self.started_at.to_rfc3339(),
            end.to_rfc3339(),
            duration,
            self.files.len(),
            self.written(),
            self.skipped(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_lookup() {
        let mut report = BatchReport::new(Mode::CaptionOnly);
        report.record("a.png", FileOutcome::Written);
        report.record("b.png", FileOutcome::Skipped(SkipReason::ArtifactExists));
        report.record(
            "c.jpg",
            FileOutcome::Failed {
                stage: Stage::Caption,
                error: "connection refused".to_string(),
            },
        );
        report.finish();

        assert_eq!(report.written(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcome_for("a.png"), Some(&FileOutcome::Written));
        assert!(report.outcome_for("zzz.png").is_none());

        let summary = report.summary();
        assert!(summary.contains("Mode: caption-only"));
        assert!(summary.contains("3 discovered, 1 written, 1 skipped, 1 failed"));
    }

    #[test]
    fn test_reached_backend() {
        assert!(FileOutcome::Written.reached_backend());
        assert!(!FileOutcome::Skipped(SkipReason::NoCaption).reached_backend());

        let read_failure = FileOutcome::Failed {
            stage: Stage::ReadImage,
            error: "denied".to_string(),
        };
        assert!(!read_failure.reached_backend());

        let refine_failure = FileOutcome::Failed {
            stage: Stage::Refine,
            error: "500".to_string(),
        };
        assert!(refine_failure.reached_backend());
    }
}
