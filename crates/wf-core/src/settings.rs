//! Conversion settings and the process-wide [`SettingsStore`].
//!
//! Settings are stored as immutable, versioned snapshots behind an `Arc`.
//! A write validates the candidate value first and then swaps the whole
//! snapshot, so readers never see a half-applied update and a task that
//! captured a snapshot keeps it no matter what happens to the store later.

use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const FPS_RANGE: RangeInclusive<u32> = 1..=120;
pub const MAX_DIMENSION_RANGE: RangeInclusive<u32> = 16..=8192;
pub const MAX_FRAMES_RANGE: RangeInclusive<u32> = 1..=10_000;
pub const QUALITY_RANGE: RangeInclusive<u32> = 0..=100;
/// libwebp effort levels.
pub const COMPRESSION_LEVEL_RANGE: RangeInclusive<u32> = 0..=6;
pub const SKIP_FRAMES_RANGE: RangeInclusive<u32> = 0..=1000;

// ---------------------------------------------------------------------------
// ConversionSettings
// ---------------------------------------------------------------------------

/// Encoding parameters shared by every task in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    /// Target sampling rate in frames per second.
    pub fps: u32,
    /// Cap on the longest edge of the output, in pixels.
    pub max_dimension: u32,
    /// Hard cap on the number of output frames.
    pub max_frames: u32,
    /// Encoder quality hint (0-100).
    pub quality: u32,
    /// Encoder effort / size trade-off.
    pub compression_level: u32,
    /// Whether an existing output file may be replaced.
    pub overwrite: bool,
    /// Source frames discarded between two sampled frames.
    pub skip_frames: u32,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            fps: 10,
            max_dimension: 540,
            max_frames: 30,
            quality: 55,
            compression_level: 6,
            overwrite: false,
            skip_frames: 0,
        }
    }
}

impl ConversionSettings {
    /// Check every field against its domain, failing on the first one that
    /// is out of range.
    pub fn validate(&self) -> Result<()> {
        check_range("fps", self.fps, FPS_RANGE)?;
        check_range("max_dimension", self.max_dimension, MAX_DIMENSION_RANGE)?;
        check_range("max_frames", self.max_frames, MAX_FRAMES_RANGE)?;
        check_range("quality", self.quality, QUALITY_RANGE)?;
        check_range(
            "compression_level",
            self.compression_level,
            COMPRESSION_LEVEL_RANGE,
        )?;
        check_range("skip_frames", self.skip_frames, SKIP_FRAMES_RANGE)?;
        Ok(())
    }

    /// Return a copy with every `Some` field of `patch` applied.
    #[must_use]
    pub fn merged(&self, patch: &SettingsPatch) -> Self {
        Self {
            fps: patch.fps.unwrap_or(self.fps),
            max_dimension: patch.max_dimension.unwrap_or(self.max_dimension),
            max_frames: patch.max_frames.unwrap_or(self.max_frames),
            quality: patch.quality.unwrap_or(self.quality),
            compression_level: patch.compression_level.unwrap_or(self.compression_level),
            overwrite: patch.overwrite.unwrap_or(self.overwrite),
            skip_frames: patch.skip_frames.unwrap_or(self.skip_frames),
        }
    }
}

fn check_range(field: &str, value: u32, range: RangeInclusive<u32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(Error::validation(
            field,
            format!(
                "{value} is outside the allowed range {}..={}",
                range.start(),
                range.end()
            ),
        ))
    }
}

/// A partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub fps: Option<u32>,
    pub max_dimension: Option<u32>,
    pub max_frames: Option<u32>,
    pub quality: Option<u32>,
    pub compression_level: Option<u32>,
    pub overwrite: Option<bool>,
    pub skip_frames: Option<u32>,
}

impl SettingsPatch {
    /// Whether the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

/// An immutable settings value tagged with the store version it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSnapshot {
    /// Incremented on every successful write; starts at 0.
    pub version: u64,
    /// The settings themselves.
    pub settings: Arc<ConversionSettings>,
}

/// Process-wide, read-mostly settings.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<SettingsSnapshot>,
}

impl SettingsStore {
    /// Build a store seeded with `initial`, which must itself be valid.
    pub fn new(initial: ConversionSettings) -> Result<Self> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(SettingsSnapshot {
                version: 0,
                settings: Arc::new(initial),
            }),
        })
    }

    /// The current settings value.
    pub fn get(&self) -> Arc<ConversionSettings> {
        Arc::clone(&self.current.read().settings)
    }

    /// The current settings together with their version.
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.current.read().clone()
    }

    /// Replace the whole settings value.
    ///
    /// On a validation failure the store is left untouched.
    pub fn set(&self, settings: ConversionSettings) -> Result<SettingsSnapshot> {
        settings.validate()?;
        let mut current = self.current.write();
        *current = SettingsSnapshot {
            version: current.version + 1,
            settings: Arc::new(settings),
        };
        tracing::debug!(version = current.version, ?settings, "Settings replaced");
        Ok(current.clone())
    }

    /// Apply a partial update on top of the current value.
    ///
    /// The merge and the swap happen under one write lock so concurrent
    /// patches cannot lose each other's fields.
    pub fn update(&self, patch: &SettingsPatch) -> Result<SettingsSnapshot> {
        let mut current = self.current.write();
        let merged = current.settings.merged(patch);
        merged.validate()?;
        *current = SettingsSnapshot {
            version: current.version + 1,
            settings: Arc::new(merged),
        };
        tracing::debug!(version = current.version, ?merged, "Settings patched");
        Ok(current.clone())
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self {
            current: RwLock::new(SettingsSnapshot {
                version: 0,
                settings: Arc::new(ConversionSettings::default()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_documented_values() {
        let s = ConversionSettings::default();
        assert_eq!(s.fps, 10);
        assert_eq!(s.max_dimension, 540);
        assert_eq!(s.max_frames, 30);
        assert_eq!(s.quality, 55);
        assert_eq!(s.compression_level, 6);
        assert!(!s.overwrite);
        assert_eq!(s.skip_frames, 0);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zero_fps_is_rejected() {
        let s = ConversionSettings {
            fps: 0,
            ..Default::default()
        };
        assert_matches!(s.validate(), Err(Error::Validation { field, .. }) if field == "fps");
    }

    #[test]
    fn quality_above_100_is_rejected() {
        let s = ConversionSettings {
            quality: 101,
            ..Default::default()
        };
        assert_matches!(s.validate(), Err(Error::Validation { field, .. }) if field == "quality");
    }

    #[test]
    fn compression_level_outside_libwebp_range_is_rejected() {
        let s = ConversionSettings {
            compression_level: 7,
            ..Default::default()
        };
        assert_matches!(
            s.validate(),
            Err(Error::Validation { field, .. }) if field == "compression_level"
        );
    }

    #[test]
    fn boundary_values_are_accepted() {
        let s = ConversionSettings {
            fps: 120,
            max_dimension: 16,
            max_frames: 1,
            quality: 0,
            compression_level: 0,
            overwrite: true,
            skip_frames: 1000,
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = SettingsStore::default();
        let wanted = ConversionSettings {
            fps: 24,
            max_dimension: 720,
            max_frames: 90,
            quality: 80,
            compression_level: 4,
            overwrite: true,
            skip_frames: 2,
        };
        let snap = store.set(wanted).unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(*store.get(), wanted);
    }

    #[test]
    fn invalid_set_leaves_store_unchanged() {
        let store = SettingsStore::default();
        let before = store.snapshot();

        let bad = ConversionSettings {
            max_frames: 0,
            ..Default::default()
        };
        assert_matches!(store.set(bad), Err(Error::Validation { field, .. }) if field == "max_frames");

        let after = store.snapshot();
        assert_eq!(before, after);
        assert_eq!(after.version, 0);
    }

    #[test]
    fn update_applies_only_given_fields() {
        let store = SettingsStore::default();
        let patch = SettingsPatch {
            quality: Some(90),
            overwrite: Some(true),
            ..Default::default()
        };
        let snap = store.update(&patch).unwrap();
        assert_eq!(snap.settings.quality, 90);
        assert!(snap.settings.overwrite);
        assert_eq!(snap.settings.fps, 10);
        assert_eq!(snap.settings.max_frames, 30);
    }

    #[test]
    fn invalid_update_leaves_store_unchanged() {
        let store = SettingsStore::default();
        let patch = SettingsPatch {
            quality: Some(70),
            fps: Some(0),
            ..Default::default()
        };
        assert!(store.update(&patch).is_err());
        assert_eq!(store.get().quality, 55);
        assert_eq!(store.snapshot().version, 0);
    }

    #[test]
    fn captured_snapshot_survives_later_writes() {
        let store = SettingsStore::default();
        let captured = store.get();
        store
            .set(ConversionSettings {
                fps: 30,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(captured.fps, 10);
        assert_eq!(store.get().fps, 30);
    }

    #[test]
    fn new_rejects_invalid_initial_value() {
        let bad = ConversionSettings {
            max_dimension: 0,
            ..Default::default()
        };
        assert!(SettingsStore::new(bad).is_err());
    }

    #[test]
    fn empty_patch() {
        assert!(SettingsPatch::default().is_empty());
        assert!(!SettingsPatch {
            skip_frames: Some(1),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn concurrent_updates_do_not_lose_fields() {
        let store = Arc::new(SettingsStore::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let patch = if i % 2 == 0 {
                        SettingsPatch {
                            quality: Some(60),
                            ..Default::default()
                        }
                    } else {
                        SettingsPatch {
                            fps: Some(15),
                            ..Default::default()
                        }
                    };
                    store.update(&patch).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = store.snapshot();
        assert_eq!(snap.version, 8);
        assert_eq!(snap.settings.quality, 60);
        assert_eq!(snap.settings.fps, 15);
    }
}
