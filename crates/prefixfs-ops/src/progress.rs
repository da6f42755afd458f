//! Progress and outcome reporting for multi-key operations.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Kind of multi-key operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum OperationType {
    Copy,
    Move,
    Delete,
    Rename,
    #[strum(to_string = "Create folder")]
    CreateFolder,
}

impl OperationType {
    fn past_tense(self) -> &'static str {
        match self {
            Self::Copy => "Copied",
            Self::Move => "Moved",
            Self::Delete => "Deleted",
            Self::Rename => "Renamed",
            Self::CreateFolder => "Created",
        }
    }
}

/// A key the operation could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub key: String,
    pub message: String,
}

impl OperationError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Snapshot sent on the progress channel while keys are processed.
///
/// `bytes_total` is 0 when sizes are unknown (deletes, single-file
/// moves); [`percentage`](Self::percentage) then counts keys instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationProgress {
    pub operation_type: OperationType,
    pub keys_done: usize,
    pub keys_total: usize,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Last key processed.
    pub current_key: Option<String>,
}

impl OperationProgress {
    /// Progress before the first key.
    pub fn start(operation_type: OperationType, keys_total: usize, bytes_total: u64) -> Self {
        Self {
            operation_type,
            keys_done: 0,
            keys_total,
            bytes_done: 0,
            bytes_total,
            current_key: None,
        }
    }

    /// Count one more key as done.
    pub fn advance(&mut self, key: impl Into<String>, bytes: u64) {
        self.keys_done += 1;
        self.bytes_done += bytes;
        self.current_key = Some(key.into());
    }

    pub fn is_finished(&self) -> bool {
        self.keys_done >= self.keys_total
    }

    /// Completion, 0 to 100.
    pub fn percentage(&self) -> f64 {
        let (done, total) = if self.bytes_total > 0 {
            (self.bytes_done as f64, self.bytes_total as f64)
        } else {
            (self.keys_done as f64, self.keys_total as f64)
        };
        if total == 0.0 { 0.0 } else { done / total * 100.0 }
    }
}

/// What an operation did once it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationComplete {
    pub operation_type: OperationType,
    /// Keys processed.
    pub succeeded: usize,
    /// Keys left untouched or in a split state.
    pub failed: usize,
    /// Bytes copied, when sizes were known.
    pub bytes: u64,
    pub errors: Vec<OperationError>,
}

impl OperationComplete {
    pub(crate) fn done(operation_type: OperationType, succeeded: usize, bytes: u64) -> Self {
        Self {
            operation_type,
            succeeded,
            failed: 0,
            bytes,
            errors: Vec::new(),
        }
    }

    pub(crate) fn empty(operation_type: OperationType) -> Self {
        Self::done(operation_type, 0, 0)
    }

    pub(crate) fn push_failure(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(OperationError::new(key, message));
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// One-line description, e.g. "Moved 3 items, 1 failed".
    pub fn summary(&self) -> String {
        let noun = if self.succeeded == 1 { "item" } else { "items" };
        let mut line = format!("{} {} {noun}", self.operation_type.past_tense(), self.succeeded);
        if self.failed > 0 {
            line.push_str(&format!(", {} failed", self.failed));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_prefers_bytes() {
        let mut progress = OperationProgress::start(OperationType::Copy, 4, 200);
        progress.advance("a", 50);
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(progress.current_key.as_deref(), Some("a"));

        let mut by_count = OperationProgress::start(OperationType::Delete, 4, 0);
        by_count.advance("a", 0);
        by_count.advance("b", 0);
        assert_eq!(by_count.percentage(), 50.0);
        assert!(!by_count.is_finished());
        assert_eq!(OperationProgress::start(OperationType::Delete, 0, 0).percentage(), 0.0);
    }

    #[test]
    fn test_summary() {
        let mut complete = OperationComplete::done(OperationType::Move, 3, 0);
        assert_eq!(complete.summary(), "Moved 3 items");
        complete.push_failure("a/b", "network");
        assert!(!complete.is_success());
        assert_eq!(complete.summary(), "Moved 3 items, 1 failed");
        assert_eq!(complete.errors[0].to_string(), "a/b: network");

        let created = OperationComplete::done(OperationType::CreateFolder, 1, 0);
        assert_eq!(created.summary(), "Created 1 item");
        assert_eq!(OperationType::CreateFolder.to_string(), "Create folder");
    }
}
