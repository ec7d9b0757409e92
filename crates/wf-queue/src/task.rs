//! The conversion task and its state machine.
//!
//! ```text
//! pending ──► converting ──► done
//!    │             │
//!    └─────────────┴──────► error
//! ```
//!
//! `pending → error` only happens when dispatch rejects a task before it
//! runs. `done` and `error` are terminal: a retry is a new task.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use wf_core::{ConversionSettings, Error, Result, TaskId};

use crate::result::ConversionResult;

/// Observable lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Converting,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Converting => "converting",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a task that is running on a worker.
#[derive(Debug, Clone)]
pub struct Converting {
    /// Settings captured at dispatch; never changes afterwards.
    pub settings: Arc<ConversionSettings>,
    pub output_path: PathBuf,
    pub progress: f32,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// Payload of a successfully converted task.
#[derive(Debug, Clone)]
pub struct Completed {
    pub settings: Arc<ConversionSettings>,
    pub output_path: PathBuf,
    pub output_size: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Payload of a failed task.
#[derive(Debug, Clone)]
pub struct Failed {
    pub error: String,
    /// Last accepted progress; `None` if the task never ran.
    pub progress: Option<f32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

/// Current state with the data that only exists in that state.
#[derive(Debug, Clone)]
pub enum TaskState {
    Pending,
    Converting(Converting),
    Done(Completed),
    Error(Failed),
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Converting(_) => TaskStatus::Converting,
            TaskState::Done(_) => TaskStatus::Done,
            TaskState::Error(_) => TaskStatus::Error,
        }
    }
}

/// Result of feeding a progress report to a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressUpdate {
    /// The value was recorded.
    Advanced(f32),
    /// Same as the recorded value.
    Unchanged,
    /// Lower than the recorded value; ignored.
    Regressed { last: f32, reported: f32 },
}

/// One input file and its lifecycle.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    id: TaskId,
    name: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
    state: TaskState,
}

impl ConversionTask {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            id: TaskId::new(),
            name,
            path,
            created_at: Utc::now(),
            state: TaskState::Pending,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Current progress; absent while pending.
    pub fn progress(&self) -> Option<f32> {
        match &self.state {
            TaskState::Pending => None,
            TaskState::Converting(c) => Some(c.progress),
            TaskState::Done(_) => Some(100.0),
            TaskState::Error(f) => f.progress,
        }
    }

    /// The settings snapshot this task runs with, once dispatched.
    pub fn settings(&self) -> Option<&Arc<ConversionSettings>> {
        match &self.state {
            TaskState::Converting(c) => Some(&c.settings),
            TaskState::Done(d) => Some(&d.settings),
            TaskState::Pending | TaskState::Error(_) => None,
        }
    }

    /// Output path this task holds: while converting and after success.
    pub fn claimed_output(&self) -> Option<&Path> {
        match &self.state {
            TaskState::Converting(c) => Some(&c.output_path),
            TaskState::Done(d) => Some(&d.output_path),
            TaskState::Pending | TaskState::Error(_) => None,
        }
    }

    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        match &self.state {
            TaskState::Converting(c) => Some(&c.cancel),
            _ => None,
        }
    }

    /// `pending → converting`.
    pub fn start(
        &mut self,
        settings: Arc<ConversionSettings>,
        output_path: PathBuf,
        cancel: CancellationToken,
    ) -> Result<()> {
        if !matches!(self.state, TaskState::Pending) {
            return Err(Error::invalid_transition(self.status(), TaskStatus::Converting));
        }
        self.state = TaskState::Converting(Converting {
            settings,
            output_path,
            progress: 0.0,
            started_at: Utc::now(),
            cancel,
        });
        Ok(())
    }

    /// Record a progress report. Only valid while converting.
    pub fn update_progress(&mut self, reported: f32) -> Result<ProgressUpdate> {
        let status = self.status();
        let TaskState::Converting(c) = &mut self.state else {
            return Err(Error::invalid_transition(status, TaskStatus::Converting));
        };

        let reported = reported.clamp(0.0, 100.0);
        if reported < c.progress {
            Ok(ProgressUpdate::Regressed {
                last: c.progress,
                reported,
            })
        } else if reported == c.progress {
            Ok(ProgressUpdate::Unchanged)
        } else {
            c.progress = reported;
            Ok(ProgressUpdate::Advanced(reported))
        }
    }

    /// `converting → done`.
    pub fn complete(&mut self, output_size: u64) -> Result<ConversionResult> {
        let TaskState::Converting(c) = &self.state else {
            return Err(Error::invalid_transition(self.status(), TaskStatus::Done));
        };

        let done = Completed {
            settings: Arc::clone(&c.settings),
            output_path: c.output_path.clone(),
            output_size,
            started_at: c.started_at,
            finished_at: Utc::now(),
        };
        let result =
            ConversionResult::success(self.id, self.path.clone(), done.output_path.clone(), output_size);
        self.state = TaskState::Done(done);
        Ok(result)
    }

    /// `converting → error`, or `pending → error` for a dispatch rejection.
    ///
    /// Progress keeps its last accepted value.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<ConversionResult> {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }

        let (progress, started_at) = match &self.state {
            TaskState::Pending => (None, None),
            TaskState::Converting(c) => (Some(c.progress), Some(c.started_at)),
            TaskState::Done(_) | TaskState::Error(_) => {
                return Err(Error::invalid_transition(self.status(), TaskStatus::Error));
            }
        };

        let result = ConversionResult::failure(self.id, self.path.clone(), error.clone());
        self.state = TaskState::Error(Failed {
            error,
            progress,
            started_at,
            finished_at: result.finished_at,
        });
        Ok(result)
    }

    /// Read-only copy of the observable fields.
    pub fn snapshot(&self) -> TaskSnapshot {
        let (output_path, output_size, error, started_at, finished_at) = match &self.state {
            TaskState::Pending => (None, None, None, None, None),
            TaskState::Converting(c) => (None, None, None, Some(c.started_at), None),
            TaskState::Done(d) => (
                Some(d.output_path.clone()),
                Some(d.output_size),
                None,
                Some(d.started_at),
                Some(d.finished_at),
            ),
            TaskState::Error(f) => (
                None,
                None,
                Some(f.error.clone()),
                f.started_at,
                Some(f.finished_at),
            ),
        };

        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            status: self.status(),
            output_path,
            output_size,
            error,
            progress: self.progress(),
            created_at: self.created_at,
            started_at,
            finished_at,
        }
    }
}

/// Point-in-time view of a task, safe to hand to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub path: PathBuf,
    pub status: TaskStatus,
    /// Only set when `status == done`.
    pub output_path: Option<PathBuf>,
    /// Only set when `status == done`.
    pub output_size: Option<u64>,
    /// Only set when `status == error`.
    pub error: Option<String>,
    pub progress: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn converting(path: &str) -> ConversionTask {
        let mut task = ConversionTask::new(path);
        task.start(
            Arc::new(ConversionSettings::default()),
            PathBuf::from(path).with_extension("webp"),
            CancellationToken::new(),
        )
        .unwrap();
        task
    }

    #[test]
    fn new_task_is_pending_without_progress() {
        let task = ConversionTask::new("/clips/a.mp4");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.name(), "a.mp4");
        assert_eq!(task.progress(), None);
        assert!(task.claimed_output().is_none());
    }

    #[test]
    fn start_captures_settings() {
        let task = converting("/clips/a.mp4");
        assert_eq!(task.status(), TaskStatus::Converting);
        assert_eq!(task.progress(), Some(0.0));
        assert_eq!(task.settings().unwrap().fps, 10);
        assert_eq!(task.claimed_output(), Some(Path::new("/clips/a.webp")));
    }

    #[test]
    fn cannot_start_twice() {
        let mut task = converting("/clips/a.mp4");
        let err = task
            .start(
                Arc::new(ConversionSettings::default()),
                "/x.webp".into(),
                CancellationToken::new(),
            )
            .unwrap_err();
        assert_matches!(err, Error::InvalidTransition { from, to } if from == "converting" && to == "converting");
    }

    #[test]
    fn progress_regression_is_ignored() {
        let mut task = converting("/clips/a.mp4");
        assert_eq!(task.update_progress(40.0).unwrap(), ProgressUpdate::Advanced(40.0));
        assert_eq!(
            task.update_progress(20.0).unwrap(),
            ProgressUpdate::Regressed {
                last: 40.0,
                reported: 20.0
            }
        );
        assert_eq!(task.update_progress(40.0).unwrap(), ProgressUpdate::Unchanged);
        assert_eq!(task.progress(), Some(40.0));
    }

    #[test]
    fn progress_rejected_outside_converting() {
        let mut task = ConversionTask::new("/clips/a.mp4");
        assert!(task.update_progress(10.0).is_err());
    }

    #[test]
    fn complete_forces_full_progress() {
        let mut task = converting("/clips/a.mp4");
        task.update_progress(60.0).unwrap();
        let result = task.complete(4096).unwrap();

        assert!(result.is_success());
        assert_eq!(result.output_size(), Some(4096));
        assert_eq!(task.status(), TaskStatus::Done);
        assert_eq!(task.progress(), Some(100.0));

        let snap = task.snapshot();
        assert_eq!(snap.output_path, Some(PathBuf::from("/clips/a.webp")));
        assert_eq!(snap.output_size, Some(4096));
        assert_eq!(snap.error, None);
    }

    #[test]
    fn fail_keeps_last_progress() {
        let mut task = converting("/clips/a.mp4");
        task.update_progress(35.0).unwrap();
        let result = task.fail("cancelled").unwrap();

        assert_eq!(result.error(), Some("cancelled"));
        assert_eq!(task.progress(), Some(35.0));
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Error);
        assert_eq!(snap.output_path, None);
        assert_eq!(snap.output_size, None);
    }

    #[test]
    fn pending_can_be_rejected() {
        let mut task = ConversionTask::new("/clips/a.mp4");
        task.fail("Duplicate output").unwrap();
        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(task.progress(), None);
    }

    #[test]
    fn empty_error_gets_placeholder() {
        let mut task = converting("/clips/a.mp4");
        let result = task.fail("  ").unwrap();
        assert_eq!(result.error(), Some("unknown error"));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let mut done = converting("/clips/a.mp4");
        done.complete(1).unwrap();
        assert!(done.fail("late").is_err());
        assert!(done.complete(2).is_err());
        assert!(done.update_progress(100.0).is_err());
        assert!(done
            .start(
                Arc::new(ConversionSettings::default()),
                "/x.webp".into(),
                CancellationToken::new()
            )
            .is_err());

        let mut failed = converting("/clips/b.mp4");
        failed.fail("boom").unwrap();
        assert!(failed.complete(1).is_err());
        assert!(failed.fail("again").is_err());
        assert_eq!(failed.snapshot().error.as_deref(), Some("boom"));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Converting).unwrap(),
            "\"converting\""
        );
        assert_eq!(TaskStatus::Done.to_string(), "done");
    }
}
