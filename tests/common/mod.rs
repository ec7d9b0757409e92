//! Shared test harness for integration tests.
//!
//! Provides [`FakeCodec`], a scripted [`CodecAdapter`] keyed by input file
//! name, and [`TestHarness`] which wires it into a [`QueueManager`] with temp
//! input files.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use wf_codec::{CodecAdapter, CodecError, CodecOutput, CodecRequest, ProgressSender};
use wf_core::{ConversionSettings, OutputLayout, SettingsStore};
use wf_queue::QueueManager;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A latch that holds gated conversions until opened.
#[derive(Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// What [`FakeCodec`] does for one input.
#[derive(Clone)]
pub enum Script {
    /// Report each progress value, then succeed.
    Succeed { size: u64, progress: Vec<f32> },
    /// Fail with the given message.
    Fail(String),
    /// Block until cancelled, then report `Cancelled`.
    Hang,
    /// Report each progress value, then behave like [`Script::Hang`].
    Stall(Vec<f32>),
    /// Sleep, then succeed whether or not cancellation was requested.
    IgnoreCancel(Duration),
    /// Report the adapter as unreachable.
    Unavailable(String),
    /// Wait for the gate (or cancellation), then succeed.
    Gated(Gate),
}

impl Script {
    pub fn succeed(size: u64) -> Self {
        Script::Succeed {
            size,
            progress: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Stats {
    calls: Vec<String>,
    requests: Vec<CodecRequest>,
}

/// Scripted codec adapter. Unscripted inputs succeed with size 100.
#[derive(Default)]
pub struct FakeCodec {
    scripts: Mutex<HashMap<String, Script>>,
    stats: Mutex<Stats>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behaviour for inputs with this file name.
    pub fn script(&self, file_name: &str, script: Script) {
        self.scripts.lock().insert(file_name.to_string(), script);
    }

    /// File names in the order `convert` was called.
    pub fn calls(&self) -> Vec<String> {
        self.stats.lock().calls.clone()
    }

    /// Every request the adapter received.
    pub fn requests(&self) -> Vec<CodecRequest> {
        self.stats.lock().requests.clone()
    }

    /// Highest number of conversions running at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn play(
        &self,
        script: Script,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<CodecOutput, CodecError> {
        match script {
            Script::Succeed { size, progress: steps } => {
                for pct in steps {
                    progress.send(pct);
                    tokio::task::yield_now().await;
                }
                Ok(CodecOutput { output_size: size })
            }
            Script::Fail(message) => Err(CodecError::Failed(message)),
            Script::Hang => {
                cancel.cancelled().await;
                Err(CodecError::Cancelled)
            }
            Script::Stall(steps) => {
                for pct in steps {
                    progress.send(pct);
                }
                cancel.cancelled().await;
                Err(CodecError::Cancelled)
            }
            Script::IgnoreCancel(delay) => {
                tokio::time::sleep(delay).await;
                Ok(CodecOutput { output_size: 7 })
            }
            Script::Unavailable(reason) => Err(CodecError::Unavailable(reason)),
            Script::Gated(gate) => {
                tokio::select! {
                    _ = gate.wait() => Ok(CodecOutput { output_size: 1 }),
                    _ = cancel.cancelled() => Err(CodecError::Cancelled),
                }
            }
        }
    }
}

#[async_trait]
impl CodecAdapter for FakeCodec {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn convert(
        &self,
        request: &CodecRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<CodecOutput, CodecError> {
        let name = file_name(&request.input);
        {
            let mut stats = self.stats.lock();
            stats.calls.push(name.clone());
            stats.requests.push(request.clone());
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Script::succeed(100));
        let outcome = self.play(script, progress, cancel).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// A queue driven by a [`FakeCodec`], with inputs in a temp directory.
pub struct TestHarness {
    pub queue: QueueManager,
    pub codec: Arc<FakeCodec>,
    pub settings: Arc<SettingsStore>,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(ConversionSettings::default())
    }

    pub fn with_settings(settings: ConversionSettings) -> Self {
        let codec = Arc::new(FakeCodec::new());
        let settings = Arc::new(SettingsStore::new(settings).expect("valid settings"));
        let queue = QueueManager::new(
            codec.clone(),
            Arc::clone(&settings),
            OutputLayout::default(),
        );
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        Self {
            queue,
            codec,
            settings,
            dir,
        }
    }

    /// Create a small input file and return its path.
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"not really a video").expect("failed to write input");
        path
    }

    pub fn inputs(&self, names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| self.input(n)).collect()
    }

    /// Wait for the queue to go idle, failing the test after [`WAIT`].
    pub async fn idle(&self) {
        tokio::time::timeout(WAIT, self.queue.wait_idle())
            .await
            .expect("queue did not go idle");
    }

    /// Poll until `check` holds, failing the test after [`WAIT`].
    pub async fn until(&self, mut check: impl FnMut(&QueueManager) -> bool) {
        let poll = async {
            while !check(&self.queue) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT, poll)
            .await
            .expect("condition not reached");
    }
}
