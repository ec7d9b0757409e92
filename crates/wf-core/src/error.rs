//! Unified error type for the webpforge crates.
//!
//! Configuration problems and queue-level faults surface synchronously as
//! [`Error`]; per-task failures are recorded on the task instead and never
//! cross the queue boundary as an `Err`.

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering all failure modes in webpforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A settings or configuration field is outside its documented domain.
    #[error("Validation error [{field}]: {message}")]
    Validation {
        /// Name of the offending field (e.g. "fps").
        field: String,
        /// Human-readable description of the allowed domain.
        message: String,
    },

    /// Two tasks would write the same output file while overwrite is off.
    #[error("Duplicate output: {} is already claimed by task {owner}", path.display())]
    DuplicateOutput {
        /// The projected output path.
        path: PathBuf,
        /// Display form of the task that already owns the path.
        owner: String,
    },

    /// The codec adapter cannot be reached at all; the run has stopped.
    #[error("Codec adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A task was asked to move along an edge its state machine forbids.
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition {
        /// State the task was in.
        from: String,
        /// State the caller tried to move it to.
        to: String,
    },

    /// An external tool (ffmpeg) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A configuration file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to a process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. } => 64,
            Error::Config(_) => 78,
            Error::NotFound { .. } => 66,
            Error::DuplicateOutput { .. } => 73,
            Error::AdapterUnavailable(_) => 69,
            Error::Tool { .. } => 69,
            Error::Io { .. } => 74,
            Error::InvalidTransition { .. } => 70,
            Error::Internal(_) => 70,
        }
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::DuplicateOutput`].
    pub fn duplicate_output(path: impl Into<PathBuf>, owner: impl fmt::Display) -> Self {
        Error::DuplicateOutput {
            path: path.into(),
            owner: owner.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidTransition`].
    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error stopped the whole run rather than a single task.
    pub fn is_queue_fault(&self) -> bool {
        matches!(self, Error::AdapterUnavailable(_))
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
