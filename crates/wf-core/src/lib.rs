//! wf-core: shared types, IDs, errors, settings, configuration, and the
//! event bus.
//!
//! Every other wf-* crate builds on this one. It owns the
//! [`ConversionSettings`] value and its process-wide [`SettingsStore`], the
//! unified [`Error`] type, the typed [`TaskId`], and the broadcast
//! [`events::EventBus`] the queue publishes lifecycle changes on.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod output;
pub mod settings;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use output::OutputLayout;
pub use settings::{ConversionSettings, SettingsPatch, SettingsSnapshot, SettingsStore};
