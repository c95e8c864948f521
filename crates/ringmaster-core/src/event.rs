//! In-process publish/subscribe event bus (C2).
//!
//! A single-process channel; publishers emit [`Event`]s and subscribers
//! register a bounded queue. Emission is non-blocking relative to
//! subscribers — a slow subscriber drops its oldest queued event rather than
//! stalling the publisher, and publishing never propagates a failure back to
//! the caller.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed enumeration of every event type the core emits. Covers task
/// lifecycle, worker lifecycle, worker output, scheduler reload, undo/redo,
/// and log/message creation (SPEC_FULL.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskStarted,
    TaskCompleted,
    TaskRetry,
    TaskStatus,
    TaskResubmitted,
    WorkerUpdated,
    WorkerOutput,
    WorkerStatus,
    WorkerPaused,
    TaskCancelled,
    SchedulerReload,
    UndoPerformed,
    RedoPerformed,
    MessageCreated,
    LogCreated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub project_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, data: Value, project_id: Option<Uuid>) -> Self {
        Self {
            kind,
            data,
            project_id,
            timestamp: Utc::now(),
        }
    }
}

/// Per-subscriber bounded queue capacity before drop-oldest kicks in.
const SUBSCRIBER_CAPACITY: usize = 1024;

struct Subscriber {
    sender: flume::Sender<Event>,
    project_filter: Option<Uuid>,
}

/// The event bus. Cheaply cloneable (wraps an `Arc` internally via
/// `flume::Sender`'s own clone semantics plus a mutex-guarded subscriber
/// list).
#[derive(Clone)]
pub struct EventBus {
    inner: std::sync::Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber, optionally scoped to one project.
    pub fn subscribe(&self, project_filter: Option<Uuid>) -> flume::Receiver<Event> {
        let (tx, rx) = flume::bounded(SUBSCRIBER_CAPACITY);
        let mut subs = self.inner.lock().expect("EventBus lock poisoned");
        subs.push(Subscriber {
            sender: tx,
            project_filter,
        });
        rx
    }

    /// Publish an event to every matching, still-connected subscriber.
    /// Full queues drop their oldest entry to make room (best-effort
    /// delivery, no blocking, no propagated failure).
    pub fn publish(&self, event: Event) {
        let mut subs = self.inner.lock().expect("EventBus lock poisoned");
        subs.retain(|sub| {
            if let Some(filter) = sub.project_filter {
                if event.project_id != Some(filter) {
                    return true; // not a match, keep subscriber, don't send
                }
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(flume::TrySendError::Full(_)) => {
                    // Drop-oldest: best effort via recv then re-send.
                    let _ = sub.sender.try_recv();
                    let _ = sub.sender.try_send(event.clone());
                    true
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("EventBus lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
