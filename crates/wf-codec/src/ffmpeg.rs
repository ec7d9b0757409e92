//! Animated WebP encoding through ffmpeg + libwebp.
//!
//! Frames are resampled to `fps`, thinned by `skip_frames`, scaled so the
//! longest edge is `max_dimension`, and the *output* is capped at
//! `max_frames` (skip first, then cap).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wf_core::ConversionSettings;

use crate::adapter::{CodecAdapter, CodecOutput, CodecRequest};
use crate::command::{StreamOutcome, ToolCommand};
use crate::error::CodecError;
use crate::progress::ProgressSender;
use crate::tools::ToolRegistry;

/// Upper bound for a single clip; generous since max_frames already caps work.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Used when ffmpeg fails without writing anything to stderr.
const FALLBACK_ERROR: &str = "ffmpeg conversion failed";

/// Build the `-vf` filter chain for `settings`.
pub fn build_filter(settings: &ConversionSettings) -> String {
    let mut filters = vec![format!("fps={}", settings.fps)];

    if settings.skip_frames > 0 {
        // Keep one frame, drop the next `skip_frames`.
        filters.push(format!(
            "select='not(mod(n\\,{}))'",
            settings.skip_frames + 1
        ));
    }

    let max = settings.max_dimension;
    filters.push(format!(
        "scale='if(gt(iw,ih),{max},-2)':'if(gt(iw,ih),-2,{max})':flags=lanczos"
    ));

    filters.join(",")
}

/// Build the full ffmpeg argument list for one conversion.
pub fn build_args(input: &Path, output: &Path, settings: &ConversionSettings) -> Vec<String> {
    let overwrite_flag = if settings.overwrite { "-y" } else { "-n" };

    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
        overwrite_flag,
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push(input.to_string_lossy().to_string());
    args.push("-an".into());
    args.push("-vf".into());
    args.push(build_filter(settings));
    args.push("-frames:v".into());
    args.push(settings.max_frames.to_string());
    args.extend(
        ["-c:v", "libwebp", "-lossless", "0", "-preset", "photo", "-qscale:v"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(settings.quality.to_string());
    args.push("-compression_level".into());
    args.push(settings.compression_level.to_string());
    args.extend(
        ["-loop", "0", "-fps_mode", "passthrough"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().to_string());

    args
}

/// Turns ffmpeg's `-progress` key=value stream into percentages.
///
/// A percentage is produced once per `progress=` line, based on the last
/// `frame=` seen and the output frame cap.
#[derive(Debug)]
pub struct ProgressParser {
    max_frames: u32,
    frame: Option<u64>,
}

impl ProgressParser {
    pub fn new(max_frames: u32) -> Self {
        Self {
            max_frames: max_frames.max(1),
            frame: None,
        }
    }

    /// Feed one line; returns a percentage at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<f32> {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("frame=") {
            if let Ok(frame) = val.trim().parse::<u64>() {
                self.frame = Some(frame);
            }
            None
        } else if line.starts_with("progress=") {
            let frame = self.frame?;
            let ratio = (frame as f64 / self.max_frames as f64).min(1.0);
            Some((ratio * 100.0) as f32)
        } else {
            None
        }
    }
}

/// Production [`CodecAdapter`] backed by an external ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    tools: Arc<ToolRegistry>,
    timeout: Duration,
}

impl FfmpegCodec {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Builder: set the per-file timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn ffmpeg_command(&self) -> Result<ToolCommand, CodecError> {
        let ffmpeg = self
            .tools
            .require("ffmpeg")
            .map_err(|e| CodecError::Unavailable(e.to_string()))?;
        let mut cmd = ToolCommand::new(ffmpeg.path.clone());
        cmd.timeout(self.timeout);
        Ok(cmd)
    }
}

#[async_trait]
impl CodecAdapter for FfmpegCodec {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn check(&self) -> Result<(), CodecError> {
        let mut cmd = self.ffmpeg_command()?;
        cmd.timeout(Duration::from_secs(10));
        cmd.args(["-hide_banner", "-encoders"]);

        let output = cmd
            .execute()
            .await
            .map_err(|e| CodecError::Unavailable(e.to_string()))?;

        if output.stdout.contains("libwebp") {
            Ok(())
        } else {
            Err(CodecError::Unavailable(
                "ffmpeg was built without the libwebp encoder".into(),
            ))
        }
    }

    async fn convert(
        &self,
        request: &CodecRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<CodecOutput, CodecError> {
        let settings = &request.settings;
        let mut cmd = self.ffmpeg_command()?;

        if !settings.overwrite && request.output.exists() {
            return Err(CodecError::OutputExists);
        }
        if cancel.is_cancelled() {
            return Err(CodecError::Cancelled);
        }

        tracing::debug!(
            input = %request.input.display(),
            output = %request.output.display(),
            filter = %build_filter(settings),
            "ffmpeg encode"
        );

        cmd.args(build_args(&request.input, &request.output, settings));

        let mut parser = ProgressParser::new(settings.max_frames);
        let outcome = cmd
            .execute_streaming(
                |line| {
                    if let Some(pct) = parser.feed(line) {
                        progress.send(pct);
                    }
                },
                cancel,
            )
            .await
            .map_err(|e| CodecError::Unavailable(e.to_string()))?;

        match outcome {
            StreamOutcome::Exited { status, .. } if status.success() => {
                let meta = tokio::fs::metadata(&request.output).await.map_err(|e| {
                    CodecError::Failed(format!("output missing after conversion: {e}"))
                })?;
                Ok(CodecOutput {
                    output_size: meta.len(),
                })
            }
            StreamOutcome::Exited { stderr, .. } => {
                let message = stderr.trim();
                if message.contains("already exists") {
                    Err(CodecError::OutputExists)
                } else if message.is_empty() {
                    Err(CodecError::Failed(FALLBACK_ERROR.into()))
                } else {
                    Err(CodecError::Failed(message.to_string()))
                }
            }
            StreamOutcome::Cancelled => {
                remove_partial(&request.output).await;
                Err(CodecError::Cancelled)
            }
            StreamOutcome::TimedOut(after) => {
                remove_partial(&request.output).await;
                Err(CodecError::Failed(format!("ffmpeg timed out after {after:?}")))
            }
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}
