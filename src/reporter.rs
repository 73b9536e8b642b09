//! Logging capability handed to the batch processor and backend clients.
//!
//! Nothing in the pipeline logs through a global: components receive an
//! `Arc<dyn Reporter>`. The binary wires in [`TracingReporter`]; tests use
//! [`MemoryReporter`] to assert on what was reported.

use std::sync::Mutex;

use tracing::{error, info, warn};

/// Severity of a reported line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Step,
    Success,
}

/// Sink for human-readable progress and failure messages
pub trait Reporter: Send + Sync {
    fn report(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }

    /// A new phase of work is starting
    fn step(&self, message: &str) {
        self.report(Level::Step, message);
    }

    fn success(&self, message: &str) {
        self.report(Level::Success, message);
    }
}

/// Forwards every line to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::Info => info!("{}", message),
            Level::Step => info!(stage = "step", "{}", message),
            Level::Success => info!(stage = "success", "{}", message),
            Level::Warn => warn!("{}", message),
            Level::Error => error!("{}", message),
        }
    }
}

/// Captures reported lines in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Messages reported at the given level
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    /// True if any line at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages(level).iter().any(|m| m.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, level: Level, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reporter_captures_levels() {
        let reporter = MemoryReporter::new();
        reporter.step("Scanning input");
        reporter.warn("cat.png: caption backend unreachable");
        reporter.info("done");

        assert_eq!(reporter.lines().len(), 3);
        assert_eq!(reporter.messages(Level::Step), vec!["Scanning input"]);
        assert!(reporter.contains(Level::Warn, "cat.png"));
        assert!(!reporter.contains(Level::Error, "cat.png"));
    }
}
