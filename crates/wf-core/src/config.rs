//! File-based configuration.
//!
//! An empty TOML file is a valid config: every section and field has a
//! default. Loading validates the `[settings]` block with the same rules the
//! [`SettingsStore`](crate::SettingsStore) applies at runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::output::OutputLayout;
use crate::settings::ConversionSettings;

/// Locations searched by [`load_config_or_default`], in order.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["./webpforge.toml", "~/.config/webpforge/config.toml"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: ConversionSettings,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum number of conversions running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Extension of produced files, without the leading dot.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Write every output here instead of next to its input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_extension() -> String {
    "webp".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            directory: None,
        }
    }
}

impl OutputConfig {
    /// Build the output layout described by this section.
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(self.extension.clone(), self.directory.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Explicit ffmpeg binary; looked up on `PATH` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
}

impl Config {
    /// Check every section, naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        if self.queue.concurrency == 0 {
            return Err(Error::validation("queue.concurrency", "must be at least 1"));
        }

        let ext = self.output.extension.trim();
        if ext.is_empty() {
            return Err(Error::validation("output.extension", "must not be empty"));
        }
        if ext.starts_with('.') || ext.contains(['/', '\\']) {
            return Err(Error::validation(
                "output.extension",
                format!("'{ext}' must be a bare extension such as \"webp\""),
            ));
        }

        if let Some(dir) = &self.output.directory {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::validation(
                    "output.directory",
                    format!("{} is not a directory", dir.display()),
                ));
            }
        }

        if let Some(ffmpeg) = &self.tools.ffmpeg_path {
            if !ffmpeg.exists() {
                tracing::warn!(path = %ffmpeg.display(), "Configured ffmpeg path does not exist");
            }
        }

        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse: {e}")))?;
    expand_paths(&mut config);
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;

    match parse_config(&content) {
        Err(Error::Config(msg)) => Err(Error::Config(format!("{}: {msg}", path.display()))),
        other => other,
    }
}

/// Load config from `custom_path`, the default locations, or fall back to
/// the built-in defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!(path = %path.display(), "Using config file");
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand_paths(config: &mut Config) {
    fn expand(path: &mut PathBuf) {
        if let Some(s) = path.to_str() {
            *path = PathBuf::from(shellexpand::tilde(s).as_ref());
        }
    }

    if let Some(dir) = config.output.directory.as_mut() {
        expand(dir);
    }
    if let Some(ffmpeg) = config.tools.ffmpeg_path.as_mut() {
        expand(ffmpeg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.queue.concurrency, 2);
        assert_eq!(config.output.extension, "webp");
        assert!(config.output.directory.is_none());
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let config = parse_config(
            r#"
            [settings]
            fps = 24
            overwrite = true
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.fps, 24);
        assert!(config.settings.overwrite);
        assert_eq!(config.settings.quality, 55);
        assert_eq!(config.settings.max_frames, 30);
    }

    #[test]
    fn out_of_range_setting_names_field() {
        let err = parse_config("[settings]\nquality = 150\n").unwrap_err();
        assert_matches!(err, Error::Validation { field, .. } if field == "quality");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = parse_config("[queue]\nconcurrency = 0\n").unwrap_err();
        assert_matches!(err, Error::Validation { field, .. } if field == "queue.concurrency");
    }

    #[test]
    fn dotted_extension_rejected() {
        let err = parse_config("[output]\nextension = \".webp\"\n").unwrap_err();
        assert_matches!(err, Error::Validation { field, .. } if field == "output.extension");
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = parse_config("[settings\nfps = ").unwrap_err();
        assert_matches!(err, Error::Config(_));
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn tilde_is_expanded_in_paths() {
        let config = parse_config("[output]\ndirectory = \"~/clips\"\n").unwrap();
        let dir = config.output.directory.unwrap();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("clips"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[settings]\nmax_frames = 60\n[queue]\nconcurrency = 4").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.settings.max_frames, 60);
        assert_eq!(config.queue.concurrency, 4);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = load_config(Path::new("/nonexistent/webpforge.toml")).unwrap_err();
        assert_matches!(err, Error::Config(msg) if msg.contains("/nonexistent/webpforge.toml"));
    }

    #[test]
    fn explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[settings]\nskip_frames = 3").unwrap();
        let config = load_config_or_default(Some(file.path())).unwrap();
        assert_eq!(config.settings.skip_frames, 3);
    }

    #[test]
    fn toml_output_parses_back() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[settings]"));
        assert_eq!(parse_config(&rendered).unwrap(), config);
    }
}
