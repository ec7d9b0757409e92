//! Terminal records produced once per task.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wf_core::TaskId;

/// How a task ended. Success and failure carry disjoint data, so a result
/// can never have both an output size and an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { output_path: PathBuf, output_size: u64 },
    Failure { error: String },
}

/// The record emitted when a task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub task_id: TaskId,
    pub input_path: PathBuf,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

impl ConversionResult {
    pub fn success(
        task_id: TaskId,
        input_path: PathBuf,
        output_path: PathBuf,
        output_size: u64,
    ) -> Self {
        Self {
            task_id,
            input_path,
            outcome: Outcome::Success {
                output_path,
                output_size,
            },
            finished_at: Utc::now(),
        }
    }

    pub fn failure(task_id: TaskId, input_path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            task_id,
            input_path,
            outcome: Outcome::Failure {
                error: error.into(),
            },
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn output_path(&self) -> Option<&Path> {
        match &self.outcome {
            Outcome::Success { output_path, .. } => Some(output_path),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn output_size(&self) -> Option<u64> {
        match &self.outcome {
            Outcome::Success { output_size, .. } => Some(*output_size),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error } => Some(error),
        }
    }

    /// Flatten into the serializable record shape.
    pub fn to_record(&self) -> ResultRecord {
        ResultRecord {
            task_id: self.task_id,
            input_path: self.input_path.to_string_lossy().to_string(),
            output_path: self.output_path().map(|p| p.to_string_lossy().to_string()),
            output_size: self.output_size(),
            success: self.is_success(),
            error: self.error().map(str::to_string),
        }
    }
}

/// Flat, serializable view of a [`ConversionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: TaskId,
    pub input_path: String,
    pub output_path: Option<String>,
    pub output_size: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_fields_are_exclusive_with_error() {
        let r = ConversionResult::success(
            TaskId::new(),
            "/clips/a.mp4".into(),
            "/clips/a.webp".into(),
            2048,
        );
        assert!(r.is_success());
        assert_eq!(r.output_size(), Some(2048));
        assert_eq!(r.output_path(), Some(Path::new("/clips/a.webp")));
        assert_eq!(r.error(), None);
    }

    #[test]
    fn failure_has_error_only() {
        let r = ConversionResult::failure(TaskId::new(), "/clips/a.mp4".into(), "cancelled");
        assert!(!r.is_success());
        assert_eq!(r.error(), Some("cancelled"));
        assert_eq!(r.output_size(), None);
        assert_eq!(r.output_path(), None);
    }

    #[test]
    fn record_serializes_flat() {
        let r = ConversionResult::failure(TaskId::new(), "/clips/b.mp4".into(), "output exists");
        let json = serde_json::to_value(r.to_record()).unwrap();
        assert_eq!(json["input_path"], "/clips/b.mp4");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "output exists");
        assert!(json["output_size"].is_null());
        assert!(json["output_path"].is_null());
    }
}
