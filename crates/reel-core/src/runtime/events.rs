//! Process-local, per-task notification channel.
//!
//! The executor publishes into an [`EventBus`]; consumers hold a
//! [`Subscription`] for as long as they care. Events published while nobody
//! is subscribed are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Progress,
    Complete,
    Failed,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Progress, EventKind::Complete, EventKind::Failed];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TaskEvent {
    Progress {
        task_id: String,
        /// Position reached in the output, in seconds.
        out_time_secs: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
    },
    Complete {
        task_id: String,
        result_path: Option<String>,
    },
    Failed {
        task_id: String,
        error: String,
    },
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::Progress { .. } => EventKind::Progress,
            TaskEvent::Complete { .. } => EventKind::Complete,
            TaskEvent::Failed { .. } => EventKind::Failed,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Progress { task_id, .. }
            | TaskEvent::Complete { task_id, .. }
            | TaskEvent::Failed { task_id, .. } => task_id,
        }
    }

    /// `true` for events after which a task publishes nothing more.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Progress { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<TaskEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<TaskEvent>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to current subscribers of its task. Returns how many
    /// receivers it reached.
    pub fn publish(&self, event: TaskEvent) -> usize {
        let topics = self.topics();
        match topics.get(event.task_id()) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Attach to `task_id`. An empty `kinds` slice means every kind.
    pub fn subscribe(&self, task_id: &str, kinds: &[EventKind]) -> Subscription {
        let rx = self
            .topics()
            .entry(task_id.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        tracing::debug!(task_id, "event subscriber attached");
        Subscription {
            bus: self.clone(),
            task_id: task_id.to_owned(),
            kinds: kinds.to_vec(),
            rx: Some(rx),
        }
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.topics()
            .get(task_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    fn release(&self, task_id: &str) {
        let mut topics = self.topics();
        if topics.get(task_id).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(task_id);
        }
    }
}

/// A task-scoped subscription. Detaches when dropped.
#[derive(Debug)]
pub struct Subscription {
    bus: EventBus,
    task_id: String,
    kinds: Vec<EventKind>,
    rx: Option<broadcast::Receiver<TaskEvent>>,
}

impl Subscription {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Next event of a subscribed kind; `None` once detached.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) if self.kinds.is_empty() || self.kinds.contains(&event.kind()) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(task_id = %self.task_id, skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.bus.release(&self.task_id);
            tracing::debug!(task_id = %self.task_id, "event subscriber detached");
        }
    }
}
