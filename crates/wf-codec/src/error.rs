//! Outcome of a failed conversion.

/// Why a single conversion did not produce an output file.
///
/// Every variant except [`CodecError::Unavailable`] is isolated to the task
/// that hit it. `Unavailable` means the adapter itself cannot be reached and
/// stops the whole run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The encoder ran and reported an error.
    #[error("{0}")]
    Failed(String),

    /// The destination exists and overwriting is disabled.
    #[error("output exists")]
    OutputExists,

    /// Cancellation was requested and acknowledged.
    #[error("cancelled")]
    Cancelled,

    /// The encoder cannot be launched at all.
    #[error("{0}")]
    Unavailable(String),
}

impl CodecError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CodecError::Unavailable(_))
    }
}

impl From<CodecError> for wf_core::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unavailable(msg) => wf_core::Error::AdapterUnavailable(msg),
            other => wf_core::Error::tool("codec", other.to_string()),
        }
    }
}
