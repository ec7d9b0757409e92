//! Queue notification channel.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers can catch up.
//! Per-task changes and queue-level faults travel on the same channel.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::ids::{EventId, TaskId};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Task lifecycle ------------------------------------------------------
    TaskQueued {
        task_id: TaskId,
        path: PathBuf,
    },
    TaskStarted {
        task_id: TaskId,
        output_path: PathBuf,
    },
    TaskProgress {
        task_id: TaskId,
        progress: f32,
    },
    TaskCompleted {
        task_id: TaskId,
        output_path: PathBuf,
        output_size: u64,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    /// A pending task was removed before it was ever dispatched.
    TaskCancelled {
        task_id: TaskId,
    },

    // -- Queue lifecycle -----------------------------------------------------
    QueueStarted {
        concurrency: usize,
    },
    /// Nothing is converting and nothing more will be dispatched.
    QueueIdle,
    /// The codec adapter became unreachable and dispatching stopped.
    QueueFaulted {
        error: String,
    },
}

impl EventPayload {
    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            EventPayload::TaskQueued { task_id, .. }
            | EventPayload::TaskStarted { task_id, .. }
            | EventPayload::TaskProgress { task_id, .. }
            | EventPayload::TaskCompleted { task_id, .. }
            | EventPayload::TaskFailed { task_id, .. }
            | EventPayload::TaskCancelled { task_id } => Some(*task_id),
            EventPayload::QueueStarted { .. }
            | EventPayload::QueueIdle
            | EventPayload::QueueFaulted { .. } => None,
        }
    }

    /// Whether this event ends the life of its task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::TaskCompleted { .. }
                | EventPayload::TaskFailed { .. }
                | EventPayload::TaskCancelled { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Queue notification channel plus a short history for late subscribers.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: RwLock<VecDeque<Event>>,
    history_len: usize,
}

impl EventBus {
    /// `capacity` sizes the broadcast buffer; slow receivers lag once it
    /// fills. The history keeps the last 100 events.
    pub fn new(capacity: usize) -> Self {
        Self::with_history(capacity, MAX_RECENT_EVENTS)
    }

    pub fn with_history(capacity: usize, history_len: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            history: RwLock::new(VecDeque::with_capacity(history_len)),
            history_len,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Stamp `payload`, remember it and fan it out.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        if self.history_len > 0 {
            let mut history = self.history.write();
            history.truncate(self.history_len - 1);
            history.push_front(event.clone());
        }

        // Nobody listening is normal for a headless batch.
        let _ = self.tx.send(event);
    }

    /// Up to `n` remembered events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.history.read().iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .field("history", &self.history.read().len())
            .finish()
    }
}
