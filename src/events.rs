//! Synchronous publish/subscribe for queue lifecycle notifications.
//!
//! The [`EventBus`] delivers every [`QueueEvent`] to the handlers registered
//! for its [`QueueTopic`], in registration order, on the publishing thread.
//!
//! # Handler isolation
//!
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still receive the event and the publisher never sees the
//! failure. The bus holds no lock while handlers run, so a handler may call
//! back into the queue (for example to pause it after an item completes).
//!
//! # Examples
//!
//! ```rust
//! use batchwork::events::{EventBus, QueueEvent, QueueTopic};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! let bus = EventBus::new_default();
//! let resets = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&resets);
//! let id = bus.subscribe(QueueTopic::Reset, move |_event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! bus.publish(&QueueEvent::Reset);
//! assert_eq!(resets.load(Ordering::SeqCst), 1);
//!
//! assert!(bus.unsubscribe(QueueTopic::Reset, id));
//! bus.publish(&QueueEvent::Reset);
//! assert_eq!(resets.load(Ordering::SeqCst), 1);
//! ```

use crate::{
    Result,
    item::{ItemId, WorkItem},
    progress::{ProgressSnapshot, SummaryReport},
    queue::QueueState,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{error, trace};
use uuid::Uuid;

pub type SubscriptionId = Uuid;

pub type EventHandler = Arc<dyn Fn(&QueueEvent) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTopic {
    QueueUpdated,
    StateChange,
    ItemStart,
    ItemComplete,
    Progress,
    Completed,
    Reset,
}

impl QueueTopic {
    pub const ALL: [QueueTopic; 7] = [
        QueueTopic::QueueUpdated,
        QueueTopic::StateChange,
        QueueTopic::ItemStart,
        QueueTopic::ItemComplete,
        QueueTopic::Progress,
        QueueTopic::Completed,
        QueueTopic::Reset,
    ];
}

impl fmt::Display for QueueTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueTopic::QueueUpdated => "queue_updated",
            QueueTopic::StateChange => "state_change",
            QueueTopic::ItemStart => "item_start",
            QueueTopic::ItemComplete => "item_complete",
            QueueTopic::Progress => "progress",
            QueueTopic::Completed => "completed",
            QueueTopic::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// What changed in the item store for a `queue_updated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueChange {
    Added { items: Vec<WorkItem> },
    Removed { id: ItemId },
    Cleared { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum QueueEvent {
    QueueUpdated {
        change: QueueChange,
        total: usize,
    },
    StateChange {
        from: QueueState,
        to: QueueState,
    },
    ItemStart {
        item: WorkItem,
    },
    ItemComplete {
        item: WorkItem,
        progress: ProgressSnapshot,
    },
    Progress(ProgressSnapshot),
    Completed(SummaryReport),
    Reset,
}

impl QueueEvent {
    pub fn topic(&self) -> QueueTopic {
        match self {
            QueueEvent::QueueUpdated { .. } => QueueTopic::QueueUpdated,
            QueueEvent::StateChange { .. } => QueueTopic::StateChange,
            QueueEvent::ItemStart { .. } => QueueTopic::ItemStart,
            QueueEvent::ItemComplete { .. } => QueueTopic::ItemComplete,
            QueueEvent::Progress(_) => QueueTopic::Progress,
            QueueEvent::Completed(_) => QueueTopic::Completed,
            QueueEvent::Reset => QueueTopic::Reset,
        }
    }
}

/// Configuration for the event bus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventConfig {
    /// Whether to trace every published event
    pub log_events: bool,
}

/// Counters describing event bus activity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventBusStats {
    pub subscriptions: usize,
    pub published: u64,
    pub handler_failures: u64,
}

struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler,
}

pub struct EventBus {
    handlers: RwLock<HashMap<QueueTopic, Vec<Subscriber>>>,
    config: EventConfig,
    published: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventConfig) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            config,
            published: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    pub fn new_default() -> Self {
        Self::new(EventConfig::default())
    }

    /// Registers a handler for one topic and returns its subscription id.
    pub fn subscribe<F>(&self, topic: QueueTopic, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(topic, Arc::new(handler))
    }

    pub fn subscribe_handler(&self, topic: QueueTopic, handler: EventHandler) -> SubscriptionId {
        let id = Uuid::new_v4();
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers
            .entry(topic)
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Removes a handler; returns whether it was registered for `topic`.
    pub fn unsubscribe(&self, topic: QueueTopic, id: SubscriptionId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(subscribers) = handlers.get_mut(&topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self, topic: QueueTopic) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Delivers an event to every handler of its topic.
    pub fn publish(&self, event: &QueueEvent) {
        let topic = event.topic();
        self.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot the handlers so none of them runs under the lock.
        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let registry = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match registry.get(&topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler)))
                    .collect(),
                None => Vec::new(),
            }
        };

        if self.config.log_events {
            trace!("Publishing {} event to {} handlers", topic, handlers.len());
        }

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Handler {} for {} event failed: {}", id, topic, e);
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Handler {} for {} event panicked", id, topic);
                }
            }
        }
    }

    pub fn stats(&self) -> EventBusStats {
        let subscriptions = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(Vec::len)
            .sum();
        EventBusStats {
            subscriptions,
            published: self.published.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new_default()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
