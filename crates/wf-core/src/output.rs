//! Output path derivation.

use std::path::{Component, Path, PathBuf};

/// Decides where a converted file is written.
///
/// The default layout puts `<stem>.webp` next to the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    extension: String,
    directory: Option<PathBuf>,
}

impl OutputLayout {
    pub fn new(extension: impl Into<String>, directory: Option<PathBuf>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.').to_string();
        Self {
            extension,
            directory,
        }
    }

    /// Layout writing into `directory` instead of next to each input.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Project the output path for `input`. Pure: nothing is read or created.
    ///
    /// `.` components are dropped so `./a.mp4` and `a.mp4` project to the
    /// same output.
    pub fn derive(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "output".into());

        let mut name = stem;
        name.push(".");
        name.push(&self.extension);

        let projected = match &self.directory {
            Some(dir) => dir.join(name),
            None => match input.parent() {
                Some(parent) => parent.join(name),
                None => PathBuf::from(name),
            },
        };

        projected
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new("webp", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_extension_next_to_input() {
        let layout = OutputLayout::default();
        assert_eq!(
            layout.derive(Path::new("/clips/holiday.mp4")),
            PathBuf::from("/clips/holiday.webp")
        );
    }

    #[test]
    fn only_last_extension_is_replaced() {
        let layout = OutputLayout::default();
        assert_eq!(
            layout.derive(Path::new("/clips/a.b.mov")),
            PathBuf::from("/clips/a.b.webp")
        );
    }

    #[test]
    fn extensionless_input() {
        let layout = OutputLayout::default();
        assert_eq!(
            layout.derive(Path::new("/clips/raw")),
            PathBuf::from("/clips/raw.webp")
        );
    }

    #[test]
    fn relative_input_without_parent() {
        let layout = OutputLayout::default();
        assert_eq!(layout.derive(Path::new("clip.mp4")), PathBuf::from("clip.webp"));
    }

    #[test]
    fn output_directory_overrides_parent() {
        let layout = OutputLayout::default().with_directory("/out");
        assert_eq!(
            layout.derive(Path::new("/clips/x.mp4")),
            PathBuf::from("/out/x.webp")
        );
    }

    #[test]
    fn same_stem_collides() {
        let layout = OutputLayout::default();
        assert_eq!(
            layout.derive(Path::new("/clips/y.mp4")),
            layout.derive(Path::new("/clips/y.mkv"))
        );
    }

    #[test]
    fn leading_dot_in_extension_is_dropped() {
        let layout = OutputLayout::new(".gif", None);
        assert_eq!(layout.extension(), "gif");
        assert_eq!(layout.derive(Path::new("/a/b.mp4")), PathBuf::from("/a/b.gif"));
    }

    #[test]
    fn current_dir_components_are_dropped() {
        let layout = OutputLayout::default();
        assert_eq!(
            layout.derive(Path::new("./clip.mp4")).as_os_str(),
            layout.derive(Path::new("clip.mov")).as_os_str()
        );
        assert_eq!(
            layout.derive(Path::new("/clips/./a.mp4")).as_os_str(),
            Path::new("/clips/a.webp").as_os_str()
        );
        let into_dir = OutputLayout::default().with_directory("./out");
        assert_eq!(
            into_dir.derive(Path::new("x.mp4")).as_os_str(),
            Path::new("out/x.webp").as_os_str()
        );
    }
}
