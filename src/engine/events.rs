// src/engine/events.rs

//! Lifecycle notifications.
//!
//! Events are fire-and-observe: observers and subscribers see them after the
//! state change they describe, and nothing they do feeds back into
//! scheduling.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{RunStatistics, TaskId};
use crate::exec::BackendHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        total: usize,
    },
    TaskStarted {
        task_id: TaskId,
        attempt: u32,
    },
    TaskCompleted {
        task_id: TaskId,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    TaskRetrying {
        task_id: TaskId,
        retry: u32,
        delay: Duration,
        error: String,
    },
    TaskFallback {
        task_id: TaskId,
        fallback_id: TaskId,
    },
    ApprovalRequired {
        task_id: TaskId,
        handle: Option<BackendHandle>,
    },
    RunCompleted {
        stats: RunStatistics,
    },
}

impl RunEvent {
    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            RunEvent::TaskStarted { task_id, .. }
            | RunEvent::TaskCompleted { task_id }
            | RunEvent::TaskFailed { task_id, .. }
            | RunEvent::TaskRetrying { task_id, .. }
            | RunEvent::TaskFallback { task_id, .. }
            | RunEvent::ApprovalRequired { task_id, .. } => Some(task_id),
            RunEvent::RunStarted { .. } | RunEvent::RunCompleted { .. } => None,
        }
    }
}

/// Callback-style consumer of lifecycle events.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Fan-out of events to registered observers and channel subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<RwLock<Vec<Arc<dyn RunObserver>>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<RunEvent>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventBus")
            .field("observers", &observers)
            .field("subscribers", &subscribers)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn RunObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Receive every event emitted from now on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: RunEvent) {
        debug!(?event, "lifecycle event");

        // Observers run outside the lock so they may register others.
        let observers: Vec<Arc<dyn RunObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_event(&event);
        }

        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Logs every lifecycle event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { total } => info!(total, "run started"),
            RunEvent::TaskStarted { task_id, attempt } => {
                info!(task = %task_id, attempt, "task started")
            }
            RunEvent::TaskCompleted { task_id } => info!(task = %task_id, "task completed"),
            RunEvent::TaskFailed { task_id, error } => {
                warn!(task = %task_id, error = %error, "task failed")
            }
            RunEvent::TaskRetrying {
                task_id,
                retry,
                delay,
                error,
            } => warn!(task = %task_id, retry, ?delay, error = %error, "task retrying"),
            RunEvent::TaskFallback {
                task_id,
                fallback_id,
            } => warn!(task = %task_id, fallback = %fallback_id, "task replaced by fallback"),
            RunEvent::ApprovalRequired { task_id, handle } => match handle {
                Some(h) => info!(task = %task_id, unit = %h, "approval required"),
                None => info!(task = %task_id, "approval required"),
            },
            RunEvent::RunCompleted { stats } => info!(%stats, "run completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(Mutex<Vec<String>>);

    impl RunObserver for Counter {
        fn on_event(&self, event: &RunEvent) {
            if let Some(id) = event.task_id() {
                self.0.lock().unwrap().push(id.to_string());
            }
        }
    }

    #[test]
    fn observers_and_subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(Mutex::new(Vec::new())));
        bus.add_observer(counter.clone());
        let mut rx = bus.subscribe();

        bus.emit(RunEvent::RunStarted { total: 2 });
        bus.emit(RunEvent::TaskStarted {
            task_id: "a".into(),
            attempt: 1,
        });
        bus.emit(RunEvent::TaskCompleted { task_id: "a".into() });

        assert_eq!(*counter.0.lock().unwrap(), vec!["a", "a"]);
        assert_eq!(rx.try_recv().unwrap(), RunEvent::RunStarted { total: 2 });
        assert!(matches!(rx.try_recv().unwrap(), RunEvent::TaskStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), RunEvent::TaskCompleted { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.emit(RunEvent::RunStarted { total: 0 });
        assert_eq!(bus.subscribers.lock().unwrap().len(), 0);
    }
}
