//! Identifiers for tasks and events.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declare a `Copy` id backed by a random v4 UUID, serialized as the bare
/// UUID string.
macro_rules! typed_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }
        )+
    };
}

typed_id! {
    /// Identity of one conversion task. Never reused: a retried file gets a
    /// fresh id.
    TaskId,
    /// Identity of one broadcast event.
    EventId,
}
