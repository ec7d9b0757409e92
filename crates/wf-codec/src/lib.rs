//! wf-codec: the boundary between the queue and the actual encoder.
//!
//! The queue only ever talks to a [`CodecAdapter`]. [`FfmpegCodec`] is the
//! production adapter; it drives an external `ffmpeg` built with libwebp
//! through [`ToolCommand`].

pub mod adapter;
pub mod command;
pub mod error;
pub mod ffmpeg;
pub mod progress;
pub mod tools;

pub use adapter::{CodecAdapter, CodecOutput, CodecRequest};
pub use command::{StreamOutcome, ToolCommand, ToolOutput};
pub use error::CodecError;
pub use ffmpeg::FfmpegCodec;
pub use progress::ProgressSender;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};

pub use tokio_util::sync::CancellationToken;
