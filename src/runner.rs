//! Runs one batch of inputs through a [`QueueManager`] and collects the
//! results.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use wf_codec::{FfmpegCodec, ToolRegistry};
use wf_core::config::Config;
use wf_core::events::{Event, EventPayload};
use wf_core::{Error, SettingsPatch, SettingsStore, TaskId};
use wf_queue::{ConversionResult, QueueManager};

/// Everything `convert` needs beyond the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub inputs: Vec<PathBuf>,
    pub overrides: SettingsPatch,
    pub concurrency: Option<usize>,
    pub output_dir: Option<PathBuf>,
}

/// Outcome of a whole batch.
#[derive(Debug)]
pub struct BatchReport {
    /// Terminal results in completion order.
    pub results: Vec<ConversionResult>,
    /// Set when the codec adapter became unavailable and the run stopped.
    pub fault: Option<String>,
    /// Whether the run was cut short by a shutdown request.
    pub interrupted: bool,
    /// Pending tasks dropped by the shutdown request.
    pub removed: usize,
    /// Tasks still pending when dispatching halted.
    pub not_started: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// 0 when every input converted, 1 when any did not, and the adapter
    /// exit code when the queue faulted.
    pub fn exit_code(&self) -> i32 {
        if let Some(fault) = &self.fault {
            return Error::AdapterUnavailable(fault.clone()).exit_code();
        }
        if self.failed() > 0 || self.removed > 0 || self.not_started > 0 {
            1
        } else {
            0
        }
    }
}

/// Initial settings from the config file with command-line overrides on top.
pub fn build_settings(config: &Config, overrides: &SettingsPatch) -> wf_core::Result<SettingsStore> {
    let store = SettingsStore::new(config.settings)?;
    if !overrides.is_empty() {
        let snapshot = store.update(overrides)?;
        tracing::debug!(version = snapshot.version, settings = ?snapshot.settings, "Applied overrides");
    }
    Ok(store)
}

/// A queue backed by the ffmpeg adapter.
pub fn build_queue(config: &Config, options: &RunOptions) -> wf_core::Result<QueueManager> {
    let settings = Arc::new(build_settings(config, &options.overrides)?);

    let mut layout = config.output.layout();
    if let Some(dir) = &options.output_dir {
        layout = layout.with_directory(dir);
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let codec = FfmpegCodec::new(tools);
    Ok(QueueManager::new(Arc::new(codec), settings, layout))
}

/// Enqueue `inputs`, run them with `concurrency` workers and wait until the
/// queue goes idle.
///
/// When `shutdown` resolves first, every remaining task is cancelled and the
/// batch ends once the in-flight conversions have stopped.
pub async fn run_batch<F>(
    queue: &QueueManager,
    inputs: Vec<PathBuf>,
    concurrency: usize,
    shutdown: F,
) -> wf_core::Result<BatchReport>
where
    F: Future<Output = ()>,
{
    let logger = tokio::spawn(log_events(queue.subscribe()));

    let ids = queue.enqueue_many(inputs);
    tracing::info!(tasks = ids.len(), concurrency, adapter = queue.adapter_name(), "Starting batch");

    if let Err(e) = queue.start(concurrency) {
        logger.abort();
        return Err(e);
    }

    tokio::pin!(shutdown);
    let mut interrupted = false;
    let mut removed = 0;

    tokio::select! {
        _ = queue.wait_idle() => {}
        _ = &mut shutdown => {
            interrupted = true;
            let summary = queue.cancel_all();
            removed = summary.removed;
            tracing::warn!(
                removed = summary.removed,
                signalled = summary.signalled,
                "Interrupted; waiting for running conversions to stop"
            );
            queue.wait_idle().await;
        }
    }

    logger.abort();

    let not_started = queue.stats().pending;
    let report = BatchReport {
        results: queue.drain_results(),
        fault: queue.fault(),
        interrupted,
        removed,
        not_started,
    };
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        not_started,
        "Batch finished"
    );
    Ok(report)
}

/// Load settings, build the ffmpeg-backed queue and run `options.inputs`
/// until done or interrupted with Ctrl-C.
pub async fn convert(config: &Config, options: RunOptions) -> wf_core::Result<BatchReport> {
    let queue = build_queue(config, &options)?;
    let concurrency = options.concurrency.unwrap_or(config.queue.concurrency);

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    run_batch(&queue, options.inputs, concurrency, ctrl_c).await
}

/// Log task progress in 10% steps until the channel closes.
async fn log_events(mut rx: broadcast::Receiver<Event>) {
    let mut logged: HashMap<TaskId, u32> = HashMap::new();

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event log lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event.payload {
            EventPayload::TaskProgress { task_id, progress } => {
                let step = (progress / 10.0).floor() as u32;
                let last = logged.entry(task_id).or_insert(0);
                if step > *last {
                    *last = step;
                    tracing::info!(task_id = %task_id, "Progress {:.0}%", progress);
                }
            }
            EventPayload::TaskCancelled { task_id } => {
                tracing::info!(task_id = %task_id, "Removed before start");
            }
            EventPayload::QueueFaulted { error } => {
                tracing::error!(error = %error, "Queue halted");
            }
            ref payload if payload.is_terminal() => {
                if let Some(task_id) = payload.task_id() {
                    logged.remove(&task_id);
                }
            }
            _ => {}
        }
    }
}
