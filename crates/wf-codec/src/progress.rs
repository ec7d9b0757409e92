//! Progress reporting from inside an adapter.

/// Sender for reporting progress from within a conversion.
///
/// Wraps a callback that receives a progress percentage (0.0 -- 100.0).
pub struct ProgressSender {
    callback: Box<dyn Fn(f32) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_| {}),
        }
    }

    /// Report progress. Values are clamped to 0..=100; NaN is dropped.
    pub fn send(&self, progress: f32) {
        if progress.is_nan() {
            return;
        }
        (self.callback)(progress.clamp(0.0, 100.0));
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}
