//! The queue manager: FIFO dispatch onto a bounded set of workers.
//!
//! All bookkeeping happens synchronously under one short-lived lock; the lock
//! is never held across an `.await`. Workers only suspend while the codec
//! adapter runs, and funnel every progress report and outcome back through
//! [`Shared::record_progress`] and [`Shared::finish`], which makes the
//! manager the single writer for every task's state.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use wf_codec::{CodecAdapter, CodecError, CodecOutput, CodecRequest, ProgressSender};
use wf_core::events::{Event, EventBus, EventPayload};
use wf_core::{Error, OutputLayout, Result, SettingsStore, TaskId};

use crate::result::{ConversionResult, Outcome};
use crate::task::{ConversionTask, ProgressUpdate, TaskSnapshot, TaskStatus};

/// Prefix of the error recorded on tasks force-failed by a queue fault.
pub const ADAPTER_UNAVAILABLE: &str = "codec adapter unavailable";

/// What [`QueueManager::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was pending and has been removed; it will produce no result.
    Removed,
    /// The task is converting; the adapter has been asked to stop.
    Signalled,
    /// The task had already reached a terminal state.
    AlreadyFinished,
}

/// Counts returned by [`QueueManager::cancel_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CancelSummary {
    pub removed: usize,
    pub signalled: usize,
}

/// Counts of live tasks per status plus the dispatcher state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub converting: usize,
    pub done: usize,
    pub failed: usize,
    pub running: bool,
    pub faulted: bool,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.converting + self.done + self.failed
    }

    /// Whether nothing new will be dispatched.
    pub fn is_halted(&self) -> bool {
        !self.running || self.faulted
    }

    /// Nothing is converting, and nothing pending can start.
    pub fn is_idle(&self) -> bool {
        self.converting == 0 && (self.pending == 0 || self.is_halted())
    }
}

struct Inner {
    /// Live tasks in enqueue order.
    tasks: Vec<ConversionTask>,
    /// Pending task ids in dispatch order.
    pending: VecDeque<TaskId>,
    /// Terminal results not yet drained, in completion order.
    results: Vec<ConversionResult>,
    running: bool,
    concurrency: usize,
    /// Spawned workers that have not reported back yet.
    workers: usize,
    fault: Option<String>,
    idle_announced: bool,
    runtime: Option<Handle>,
}

impl Inner {
    fn task(&self, id: TaskId) -> Option<&ConversionTask> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut ConversionTask> {
        self.tasks.iter_mut().find(|t| t.id() == id)
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            running: self.running,
            faulted: self.fault.is_some(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status() {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Converting => stats.converting += 1,
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Error => stats.failed += 1,
            }
        }
        stats
    }
}

struct Shared {
    adapter: Arc<dyn CodecAdapter>,
    settings: Arc<SettingsStore>,
    layout: OutputLayout,
    events: EventBus,
    inner: Mutex<Inner>,
    stats_tx: watch::Sender<QueueStats>,
}

/// Schedules conversion tasks against a [`CodecAdapter`].
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct QueueManager {
    shared: Arc<Shared>,
}

impl QueueManager {
    pub fn new(
        adapter: Arc<dyn CodecAdapter>,
        settings: Arc<SettingsStore>,
        layout: OutputLayout,
    ) -> Self {
        let (stats_tx, _) = watch::channel(QueueStats::default());
        Self {
            shared: Arc::new(Shared {
                adapter,
                settings,
                layout,
                events: EventBus::default(),
                inner: Mutex::new(Inner {
                    tasks: Vec::new(),
                    pending: VecDeque::new(),
                    results: Vec::new(),
                    running: false,
                    concurrency: 1,
                    workers: 0,
                    fault: None,
                    idle_announced: false,
                    runtime: None,
                }),
                stats_tx,
            }),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.shared.settings
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.shared.layout
    }

    pub fn adapter_name(&self) -> &'static str {
        self.shared.adapter.name()
    }

    // -- Mutation ------------------------------------------------------------

    /// Append one file as a new pending task.
    pub fn enqueue(&self, path: impl Into<PathBuf>) -> TaskId {
        let mut ids = self.enqueue_many([path]);
        // enqueue_many yields exactly one id per input.
        ids.pop().unwrap_or_default()
    }

    /// Append files as pending tasks, preserving the given order.
    pub fn enqueue_many(&self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Vec<TaskId> {
        let mut inner = self.shared.inner.lock();
        let mut ids = Vec::new();

        for path in paths {
            let task = ConversionTask::new(path);
            let id = task.id();
            tracing::debug!(task_id = %id, path = %task.path().display(), "Task queued");
            self.shared.events.broadcast(EventPayload::TaskQueued {
                task_id: id,
                path: task.path().to_path_buf(),
            });
            inner.pending.push_back(id);
            inner.tasks.push(task);
            ids.push(id);
        }

        self.shared.pump(&mut inner);
        self.shared.settle(&mut inner);
        ids
    }

    /// Begin dispatching with up to `concurrency` simultaneous conversions.
    ///
    /// A no-op while already running. Must be called from within a tokio
    /// runtime; workers are spawned onto it.
    pub fn start(&self, concurrency: usize) -> Result<()> {
        if concurrency == 0 {
            return Err(Error::validation("concurrency", "must be at least 1"));
        }

        let mut inner = self.shared.inner.lock();
        if let Some(fault) = &inner.fault {
            return Err(Error::AdapterUnavailable(fault.clone()));
        }
        if inner.running {
            tracing::debug!("Queue already running; start ignored");
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| {
            Error::Internal("the queue must be started from within a tokio runtime".into())
        })?;

        inner.runtime = Some(runtime);
        inner.running = true;
        inner.concurrency = concurrency;
        inner.idle_announced = false;
        tracing::info!(concurrency, pending = inner.pending.len(), "Queue started");
        self.shared
            .events
            .broadcast(EventPayload::QueueStarted { concurrency });

        self.shared.pump(&mut inner);
        self.shared.settle(&mut inner);
        Ok(())
    }

    /// Cancel one task.
    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        let mut inner = self.shared.inner.lock();
        let outcome = self.shared.cancel_locked(&mut inner, id)?;
        self.shared.settle(&mut inner);
        Ok(outcome)
    }

    /// Cancel every live task.
    pub fn cancel_all(&self) -> CancelSummary {
        let mut inner = self.shared.inner.lock();
        let ids: Vec<TaskId> = inner
            .tasks
            .iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.id())
            .collect();

        let mut summary = CancelSummary::default();
        for id in ids {
            match self.shared.cancel_locked(&mut inner, id) {
                Ok(CancelOutcome::Removed) => summary.removed += 1,
                Ok(CancelOutcome::Signalled) => summary.signalled += 1,
                Ok(CancelOutcome::AlreadyFinished) | Err(_) => {}
            }
        }

        tracing::info!(removed = summary.removed, signalled = summary.signalled, "Cancelled all tasks");
        self.shared.settle(&mut inner);
        summary
    }

    /// Re-enqueue a failed task's file as a new task.
    pub fn retry(&self, id: TaskId) -> Result<TaskId> {
        let path = {
            let inner = self.shared.inner.lock();
            let task = inner.task(id).ok_or_else(|| Error::not_found("task", id))?;
            if task.status() != TaskStatus::Error {
                return Err(Error::invalid_transition(task.status(), TaskStatus::Pending));
            }
            task.path().to_path_buf()
        };

        let new_id = self.enqueue(path);
        tracing::info!(task_id = %id, new_task_id = %new_id, "Retrying failed task");
        Ok(new_id)
    }

    /// Remove `done` and `error` tasks from the live set.
    ///
    /// Undrained results are kept.
    pub fn clear_finished(&self) -> usize {
        let mut inner = self.shared.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|t| !t.is_terminal());
        let removed = before - inner.tasks.len();
        tracing::debug!(removed, "Cleared finished tasks");
        self.shared.settle(&mut inner);
        removed
    }

    /// Drop pending and terminal tasks, signal converting ones, stop
    /// dispatching and clear any queue fault.
    ///
    /// Undrained results are kept.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();

        let removed: Vec<TaskId> = inner.pending.drain(..).collect();
        for &task_id in &removed {
            self.shared
                .events
                .broadcast(EventPayload::TaskCancelled { task_id });
        }

        let mut signalled = 0;
        for task in &inner.tasks {
            if let Some(token) = task.cancel_token() {
                token.cancel();
                signalled += 1;
            }
        }

        inner.tasks.retain(|t| t.status() == TaskStatus::Converting);
        inner.running = false;
        inner.fault = None;
        inner.idle_announced = false;

        tracing::info!(removed = removed.len(), signalled, "Queue reset");
        self.shared.settle(&mut inner);
    }

    // -- Observation ---------------------------------------------------------

    /// Copy of every live task, in enqueue order.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let inner = self.shared.inner.lock();
        inner.tasks.iter().map(ConversionTask::snapshot).collect()
    }

    /// Copy of one live task.
    pub fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        let inner = self.shared.inner.lock();
        inner.task(id).map(ConversionTask::snapshot)
    }

    /// Take every result produced since the last call, in completion order.
    pub fn drain_results(&self) -> Vec<ConversionResult> {
        let mut inner = self.shared.inner.lock();
        std::mem::take(&mut inner.results)
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.inner.lock().stats()
    }

    /// The current fault, if the adapter became unavailable.
    pub fn fault(&self) -> Option<String> {
        self.shared.inner.lock().fault.clone()
    }

    /// Resolve once [`QueueStats::is_idle`] holds.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.stats_tx.subscribe();
        // The sender lives as long as `self`, so this cannot close early.
        let _ = rx.wait_for(QueueStats::is_idle).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// The `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.shared.events.recent_events(n)
    }

    /// Accepted progress values of one task, ending when it reaches a
    /// terminal state. Empty for unknown or already finished tasks.
    pub fn progress_stream(&self, id: TaskId) -> BoxStream<'static, f32> {
        // Subscribe before reading the state so no terminal event is missed.
        let rx = self.shared.events.subscribe();

        let initial = {
            let inner = self.shared.inner.lock();
            match inner.task(id) {
                Some(task) if !task.is_terminal() => task.progress(),
                _ => return stream::empty().boxed(),
            }
        };

        let shared = Arc::clone(&self.shared);
        let updates = stream::unfold((rx, shared), move |(mut rx, shared)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.payload {
                        EventPayload::TaskProgress { task_id, progress } if task_id == id => {
                            return Some((progress, (rx, shared)));
                        }
                        ref payload if payload.task_id() == Some(id) && payload.is_terminal() => {
                            return None;
                        }
                        _ => {}
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(task_id = %id, skipped, "Progress stream lagged");
                        // The terminal event may have been among the skipped ones.
                        let live = shared
                            .inner
                            .lock()
                            .task(id)
                            .is_some_and(|t| !t.is_terminal());
                        if !live {
                            return None;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        stream::iter(initial).chain(updates).boxed()
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("adapter", &self.shared.adapter.name())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Dispatch pending tasks into free worker slots, FIFO.
    fn pump(self: &Arc<Self>, inner: &mut Inner) {
        if !inner.running || inner.fault.is_some() {
            return;
        }
        let Some(runtime) = inner.runtime.clone() else {
            return;
        };

        while inner.workers < inner.concurrency {
            let Some(id) = inner.pending.pop_front() else {
                break;
            };
            let Some(input) = inner.task(id).map(|t| t.path().to_path_buf()) else {
                continue;
            };

            // Snapshot at dispatch: later edits never reach this task.
            let settings = self.settings.get();
            let output = self.layout.derive(&input);

            if !settings.overwrite {
                let owner = inner
                    .tasks
                    .iter()
                    .find(|t| t.id() != id && t.claimed_output() == Some(output.as_path()))
                    .map(|t| t.id());
                if let Some(owner) = owner {
                    tracing::warn!(
                        task_id = %id,
                        output = %output.display(),
                        owner = %owner,
                        "Duplicate output; task not dispatched"
                    );
                    let message = Error::duplicate_output(&output, owner).to_string();
                    self.reject(inner, id, message);
                    continue;
                }
            }

            let cancel = CancellationToken::new();
            let Some(task) = inner.task_mut(id) else {
                continue;
            };
            if let Err(e) = task.start(Arc::clone(&settings), output.clone(), cancel.clone()) {
                tracing::error!(task_id = %id, error = %e, "Failed to start task");
                continue;
            }

            inner.workers += 1;
            inner.idle_announced = false;
            tracing::info!(
                task_id = %id,
                input = %input.display(),
                output = %output.display(),
                "Dispatching conversion"
            );
            self.events.broadcast(EventPayload::TaskStarted {
                task_id: id,
                output_path: output.clone(),
            });

            let request = CodecRequest {
                input,
                output,
                settings,
            };
            let shared = Arc::clone(self);
            runtime.spawn(async move {
                shared.run(id, request, cancel).await;
            });
        }
    }

    /// Worker body: one task end to end.
    async fn run(self: Arc<Self>, id: TaskId, request: CodecRequest, cancel: CancellationToken) {
        let outcome = match tokio::fs::metadata(&request.input).await {
            Ok(meta) if meta.is_file() => {
                if cancel.is_cancelled() {
                    Err(CodecError::Cancelled)
                } else {
                    let shared = Arc::clone(&self);
                    let progress = ProgressSender::new(move |pct| shared.record_progress(id, pct));
                    AssertUnwindSafe(self.adapter.convert(&request, &progress, &cancel))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(CodecError::Failed("codec adapter panicked".into()))
                        })
                }
            }
            _ => Err(CodecError::Failed(format!(
                "input not found: {}",
                request.input.display()
            ))),
        };

        self.finish(id, outcome);
    }

    fn record_progress(&self, id: TaskId, progress: f32) {
        let mut inner = self.inner.lock();
        let Some(task) = inner.task_mut(id) else {
            return;
        };

        match task.update_progress(progress) {
            Ok(ProgressUpdate::Advanced(progress)) => {
                tracing::trace!(task_id = %id, progress, "Progress");
                self.events
                    .broadcast(EventPayload::TaskProgress { task_id: id, progress });
            }
            Ok(ProgressUpdate::Unchanged) => {}
            Ok(ProgressUpdate::Regressed { last, reported }) => {
                tracing::warn!(task_id = %id, last, reported, "Ignoring progress regression");
            }
            Err(_) => {
                tracing::trace!(task_id = %id, progress, "Progress after terminal state ignored");
            }
        }
    }

    /// Apply a worker's outcome and refill the freed slot.
    fn finish(self: &Arc<Self>, id: TaskId, outcome: std::result::Result<CodecOutput, CodecError>) {
        let mut inner = self.inner.lock();
        inner.workers = inner.workers.saturating_sub(1);

        match inner.task(id).map(|t| t.status()) {
            Some(TaskStatus::Converting) => self.apply_outcome(&mut inner, id, outcome),
            Some(status) => {
                tracing::debug!(task_id = %id, %status, ?outcome, "Discarding late outcome");
            }
            None => {
                tracing::debug!(task_id = %id, ?outcome, "Discarding outcome for removed task");
            }
        }

        self.pump(&mut inner);
        self.settle(&mut inner);
    }

    fn apply_outcome(
        &self,
        inner: &mut Inner,
        id: TaskId,
        outcome: std::result::Result<CodecOutput, CodecError>,
    ) {
        let outcome = match outcome {
            Err(CodecError::Unavailable(reason)) => {
                self.fault(inner, reason);
                return;
            }
            other => other,
        };

        let Some(task) = inner.task_mut(id) else {
            return;
        };
        let transition = match outcome {
            Ok(output) => task.complete(output.output_size),
            Err(e) => task.fail(e.to_string()),
        };

        match transition {
            Ok(result) => self.record(inner, result),
            Err(e) => tracing::error!(task_id = %id, error = %e, "Failed to record outcome"),
        }
    }

    /// The adapter cannot be reached: fail every converting task and halt.
    fn fault(&self, inner: &mut Inner, reason: String) {
        let first = inner.fault.is_none();
        if first {
            tracing::error!(error = %reason, "Codec adapter unavailable; halting queue");
            inner.fault = Some(reason.clone());
        }

        let message = format!("{ADAPTER_UNAVAILABLE}: {reason}");
        let converting: Vec<TaskId> = inner
            .tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Converting)
            .map(|t| t.id())
            .collect();

        for id in converting {
            let Some(task) = inner.task_mut(id) else {
                continue;
            };
            if let Some(token) = task.cancel_token() {
                token.cancel();
            }
            match task.fail(message.clone()) {
                Ok(result) => self.record(inner, result),
                Err(e) => tracing::error!(task_id = %id, error = %e, "Failed to force-fail task"),
            }
        }

        if first {
            self.events
                .broadcast(EventPayload::QueueFaulted { error: reason });
        }
    }

    /// Fail a pending task without dispatching it.
    fn reject(&self, inner: &mut Inner, id: TaskId, message: String) {
        let Some(task) = inner.task_mut(id) else {
            return;
        };
        match task.fail(message) {
            Ok(result) => self.record(inner, result),
            Err(e) => tracing::error!(task_id = %id, error = %e, "Failed to reject task"),
        }
    }

    fn cancel_locked(&self, inner: &mut Inner, id: TaskId) -> Result<CancelOutcome> {
        let task = inner.task(id).ok_or_else(|| Error::not_found("task", id))?;

        match task.status() {
            TaskStatus::Pending => {
                inner.pending.retain(|p| *p != id);
                inner.tasks.retain(|t| t.id() != id);
                tracing::info!(task_id = %id, "Removed pending task");
                self.events
                    .broadcast(EventPayload::TaskCancelled { task_id: id });
                Ok(CancelOutcome::Removed)
            }
            TaskStatus::Converting => {
                if let Some(token) = task.cancel_token() {
                    token.cancel();
                }
                tracing::info!(task_id = %id, "Cancellation requested");
                Ok(CancelOutcome::Signalled)
            }
            TaskStatus::Done | TaskStatus::Error => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    fn record(&self, inner: &mut Inner, result: ConversionResult) {
        let task_id = result.task_id;
        let payload = match &result.outcome {
            Outcome::Success {
                output_path,
                output_size,
            } => {
                tracing::info!(
                    task_id = %task_id,
                    output = %output_path.display(),
                    size = output_size,
                    "Conversion completed"
                );
                EventPayload::TaskCompleted {
                    task_id,
                    output_path: output_path.clone(),
                    output_size: *output_size,
                }
            }
            Outcome::Failure { error } => {
                tracing::warn!(task_id = %task_id, error = %error, "Conversion failed");
                EventPayload::TaskFailed {
                    task_id,
                    error: error.clone(),
                }
            }
        };

        self.events.broadcast(payload);
        inner.results.push(result);
    }

    /// Publish stats and announce the queue going idle once.
    fn settle(&self, inner: &mut Inner) {
        let stats = inner.stats();
        if inner.running && stats.is_idle() && !inner.idle_announced {
            inner.idle_announced = true;
            tracing::info!(done = stats.done, failed = stats.failed, "Queue idle");
            self.events.broadcast(EventPayload::QueueIdle);
        }
        self.stats_tx.send_replace(stats);
    }
}
