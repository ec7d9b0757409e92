//! The [`CodecAdapter`] trait: one input file in, one output file out.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wf_core::ConversionSettings;

use crate::error::CodecError;
use crate::progress::ProgressSender;

/// Everything an adapter needs to convert one file.
#[derive(Debug, Clone)]
pub struct CodecRequest {
    /// Source media file.
    pub input: PathBuf,
    /// Destination, already derived by the caller.
    pub output: PathBuf,
    /// Settings snapshot captured when the task was dispatched.
    pub settings: Arc<ConversionSettings>,
}

/// A successful conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOutput {
    /// Size of the written file in bytes.
    pub output_size: u64,
}

/// Performs the actual transcode for a single file.
///
/// Implementations must treat `overwrite == false` plus an existing
/// destination as [`CodecError::OutputExists`], and should return
/// [`CodecError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait CodecAdapter: Send + Sync {
    /// A short, human-readable name for this adapter (e.g. "ffmpeg").
    fn name(&self) -> &'static str;

    /// Probe whether the adapter can run at all.
    ///
    /// The default implementation assumes it can.
    async fn check(&self) -> Result<(), CodecError> {
        Ok(())
    }

    /// Convert `request.input` into `request.output`.
    ///
    /// Progress is reported as a non-decreasing percentage through
    /// `progress` before the terminal result is returned.
    async fn convert(
        &self,
        request: &CodecRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<CodecOutput, CodecError>;
}
