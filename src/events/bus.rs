//! Event bus — fan-out of task lifecycle events to any number of listeners.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Lifecycle event reported by the background worker for one of its tasks.
///
/// `task_id` is whatever the worker echoed back; it is not necessarily the
/// dispatcher's job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: serde_json::Value,
    },
    Progress {
        task_id: serde_json::Value,
        percentage: f64,
    },
    Ended {
        task_id: serde_json::Value,
    },
}

impl TaskEvent {
    /// Get the task id from any variant.
    pub fn task_id(&self) -> &serde_json::Value {
        match self {
            Self::Started { task_id }
            | Self::Progress { task_id, .. }
            | Self::Ended { task_id } => task_id,
        }
    }
}

/// Receiver of task events published by the dispatcher.
///
/// Implementations must not block: the dispatcher calls `broadcast` inline
/// while handling a worker message.
pub trait TaskEventSink: Send {
    fn broadcast(&self, event: TaskEvent);
}

impl<T: TaskEventSink + Sync + ?Sized> TaskEventSink for Arc<T> {
    fn broadcast(&self, event: TaskEvent) {
        (**self).broadcast(event)
    }
}

/// In-process publish/subscribe hub backed by a broadcast channel.
///
/// Subscribers that fall behind by more than the capacity miss the oldest
/// events.
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: TaskEvent) {
        // Ok if nobody is listening
        if self.tx.send(event).is_err() {
            debug!("Task event dropped, no subscribers");
        }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream. Lagged gaps are skipped.
    pub fn stream(&self) -> impl Stream<Item = TaskEvent> + Send + use<> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(e) => {
                    debug!(error = %e, "Task event subscriber lagged");
                    None
                }
            }
        })
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl TaskEventSink for EventBus {
    fn broadcast(&self, event: TaskEvent) {
        self.publish(event);
    }
}
