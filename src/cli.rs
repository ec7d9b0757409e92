use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use wf_core::SettingsPatch;

#[derive(Parser)]
#[command(name = "webpforge")]
#[command(author, version, about = "Batch converter turning video clips into animated WebP")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert video files to animated WebP
    Convert(ConvertArgs),

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Defaults,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Input video files, converted in the order given
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Longest side of the output, in pixels
    #[arg(long)]
    pub max_dimension: Option<u32>,

    /// Maximum number of frames in the output
    #[arg(long)]
    pub max_frames: Option<u32>,

    /// Lossy quality (0-100)
    #[arg(long)]
    pub quality: Option<u32>,

    /// Encoder effort (0-6)
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Drop this many frames between every kept frame
    #[arg(long)]
    pub skip_frames: Option<u32>,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Number of simultaneous conversions
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Write outputs here instead of next to each input
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

impl ConvertArgs {
    /// Settings overrides given on the command line.
    pub fn settings_patch(&self) -> SettingsPatch {
        SettingsPatch {
            fps: self.fps,
            max_dimension: self.max_dimension,
            max_frames: self.max_frames,
            quality: self.quality,
            compression_level: self.compression_level,
            // A bare flag can only turn overwriting on.
            overwrite: self.overwrite.then_some(true),
            skip_frames: self.skip_frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_flags_become_patch() {
        let cli = Cli::parse_from([
            "webpforge",
            "convert",
            "a.mp4",
            "b.mp4",
            "--fps",
            "15",
            "--overwrite",
            "-j",
            "3",
        ]);
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.inputs, vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")]);
        assert_eq!(args.concurrency, Some(3));

        let patch = args.settings_patch();
        assert_eq!(patch.fps, Some(15));
        assert_eq!(patch.overwrite, Some(true));
        assert_eq!(patch.quality, None);
    }

    #[test]
    fn no_overrides_is_empty_patch() {
        let cli = Cli::parse_from(["webpforge", "-v", "convert", "a.mp4"]);
        assert!(cli.verbose);
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert!(args.settings_patch().is_empty());
    }

    #[test]
    fn convert_requires_inputs() {
        assert!(Cli::try_parse_from(["webpforge", "convert"]).is_err());
    }
}
