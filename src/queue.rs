//! The operator-facing queue and its run state machine.
//!
//! A [`WorkQueue`] owns the item store, the event bus and the processor, and
//! moves through the run states below:
//!
//! ```text
//! idle ──start──▶ processing ──drained──▶ completed
//!                  │      ▲
//!             pause│      │resume
//!                  ▼      │
//!                  paused ─┘
//!
//! idle | processing | paused ──cancel──▶ cancelled
//! any state ──reset──▶ idle
//! ```
//!
//! `completed` and `cancelled` are terminal until [`WorkQueue::reset`].
//! Pausing and cancelling are cooperative: items already handed to the
//! processor always run to completion and their outcomes are still recorded;
//! only the next batch is held back.
//!
//! `WorkQueue` is a cheap handle; clones share the same queue, so one task can
//! drive [`WorkQueue::start`] while others pause, cancel or read progress.

use crate::{
    BatchworkError, Result,
    config::{ConfigOverrides, QueueConfig},
    events::{EventBus, EventBusStats, EventConfig, QueueChange, QueueEvent, QueueTopic, SubscriptionId},
    item::{IntoPayloads, ItemId, ItemStore, WorkItem},
    processor::ItemProcessor,
    progress::{self, ProgressSnapshot, SummaryReport},
    scheduler::{BatchScheduler, SchedulerExit},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Processing,
    Paused,
    Completed,
    Cancelled,
}

impl QueueState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueState::Completed | QueueState::Cancelled)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueState::Idle => "idle",
            QueueState::Processing => "processing",
            QueueState::Paused => "paused",
            QueueState::Completed => "completed",
            QueueState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// State guarded by the queue mutex.
pub(crate) struct QueueCore {
    pub(crate) store: ItemStore,
    pub(crate) state: QueueState,
    pub(crate) config: QueueConfig,
    /// Bumped by every `start()` and `reset()`; a scheduler loop only keeps
    /// drawing while the epoch it was started with is current.
    pub(crate) run_epoch: u64,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl QueueCore {
    fn summary(&self) -> SummaryReport {
        progress::summary(self.state, &self.store, self.started_at, self.finished_at)
    }
}

pub(crate) struct QueueInner {
    core: Mutex<QueueCore>,
    processor: RwLock<Option<ItemProcessor>>,
    pub(crate) events: EventBus,
    /// Signalled whenever an item settles or the run state changes.
    pub(crate) wakeup: Notify,
}

impl QueueInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        self.events.publish(&event);
    }

    fn processor(&self) -> Option<ItemProcessor> {
        self.processor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_processor(&self, processor: ItemProcessor) {
        *self.processor.write().unwrap_or_else(PoisonError::into_inner) = Some(processor);
    }
}

/// Bounded-concurrency work queue with retry, pause/resume/cancel and
/// progress reporting.
///
/// # Examples
///
/// ```rust
/// use batchwork::{WorkQueue, QueueConfig, QueueState, processor::{processor, ProcessOutput}};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = WorkQueue::new(QueueConfig::new().with_concurrency(2))
///     .with_processor(processor(|payload, _options| async move {
///         Ok(ProcessOutput::completed(json!({"imported": payload})))
///     }));
///
/// queue.add_to_queue([
///     "https://shop.example.com/p/1",
///     "https://shop.example.com/p/2",
///     "https://shop.example.com/p/3",
/// ]);
///
/// let report = queue.start(None).await?;
/// assert_eq!(report.state, QueueState::Completed);
/// assert_eq!(report.successful, 3);
/// assert_eq!(report.success_rate, 100);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_event_config(config, EventConfig::default())
    }

    pub fn new_default() -> Self {
        Self::new(QueueConfig::default())
    }

    pub fn with_event_config(config: QueueConfig, event_config: EventConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                core: Mutex::new(QueueCore {
                    store: ItemStore::new(),
                    state: QueueState::Idle,
                    config,
                    run_epoch: 0,
                    started_at: None,
                    finished_at: None,
                }),
                processor: RwLock::new(None),
                events: EventBus::new(event_config),
                wakeup: Notify::new(),
            }),
        }
    }

    pub fn with_processor(self, processor: ItemProcessor) -> Self {
        self.set_processor(processor);
        self
    }

    /// Installs or replaces the processor used by subsequent runs.
    pub fn set_processor(&self, processor: ItemProcessor) {
        self.inner.set_processor(processor);
    }

    pub fn has_processor(&self) -> bool {
        self.inner.processor().is_some()
    }

    /// Appends one or many payloads as pending items.
    ///
    /// An empty list is accepted and adds nothing.
    pub fn add_to_queue<P: IntoPayloads>(&self, payloads: P) -> Vec<WorkItem> {
        let payloads = payloads.into_payloads();
        if payloads.is_empty() {
            return Vec::new();
        }

        let (items, total) = {
            let mut core = self.inner.lock();
            let items: Vec<WorkItem> = payloads
                .into_iter()
                .map(|payload| core.store.push(payload))
                .collect();
            (items, core.store.len())
        };

        debug!("Added {} items to queue ({} total)", items.len(), total);
        self.inner.publish(QueueEvent::QueueUpdated {
            change: QueueChange::Added {
                items: items.clone(),
            },
            total,
        });
        self.inner.wakeup.notify_one();
        items
    }

    /// Removes an item; returns whether it was present.
    pub fn remove_from_queue(&self, id: ItemId) -> bool {
        let removed = {
            let mut core = self.inner.lock();
            core.store.remove(id).map(|_| core.store.len())
        };

        match removed {
            Some(total) => {
                debug!("Removed item {} from queue", id);
                self.inner.publish(QueueEvent::QueueUpdated {
                    change: QueueChange::Removed { id },
                    total,
                });
                true
            }
            None => false,
        }
    }

    /// Empties the item store without touching the run state.
    pub fn clear_queue(&self) -> usize {
        let count = self.inner.lock().store.clear();
        debug!("Cleared {} items from queue", count);
        self.inner.publish(QueueEvent::QueueUpdated {
            change: QueueChange::Cleared { count },
            total: 0,
        });
        self.inner.wakeup.notify_one();
        count
    }

    /// Runs the queue until it drains, is paused or is cancelled.
    ///
    /// Overrides are merged into the stored configuration and kept for later
    /// runs. Calling `start` while already processing logs a warning and
    /// returns the current summary without starting a second loop.
    ///
    /// If the returned future is dropped before the loop stops, the run is
    /// moved to `paused`; a later `start` or `resume` continues it.
    ///
    /// # Errors
    ///
    /// - [`BatchworkError::Configuration`] if no processor is installed or the
    ///   merged configuration is invalid. Nothing changes in that case.
    /// - [`BatchworkError::InvalidState`] if the queue is `completed` or
    ///   `cancelled`; call [`reset`](Self::reset) first.
    pub async fn start(&self, overrides: Option<ConfigOverrides>) -> Result<SummaryReport> {
        let (from, epoch, config, processor) = {
            let mut core = self.inner.lock();
            match core.state {
                QueueState::Processing => {
                    warn!("start() called while the queue is already processing; ignoring");
                    return Ok(core.summary());
                }
                QueueState::Completed | QueueState::Cancelled => {
                    return Err(BatchworkError::InvalidState {
                        operation: "start",
                        state: core.state,
                    });
                }
                QueueState::Idle | QueueState::Paused => {}
            }

            let processor = self.inner.processor().ok_or_else(|| {
                BatchworkError::Configuration("no processor configured".to_string())
            })?;

            let config = match &overrides {
                Some(overrides) => core.config.merged(overrides),
                None => core.config.clone(),
            };
            config.validate()?;

            let from = core.state;
            core.config = config.clone();
            core.state = QueueState::Processing;
            core.run_epoch += 1;
            if core.started_at.is_none() {
                core.started_at = Some(Utc::now());
            }
            (from, core.run_epoch, config, processor)
        };

        info!(
            "Queue processing started (concurrency {}, retry budget {})",
            config.concurrency, config.retry_budget
        );
        self.inner.publish(QueueEvent::StateChange {
            from,
            to: QueueState::Processing,
        });

        let guard = RunGuard {
            inner: &self.inner,
            epoch,
            armed: true,
        };
        let exit = BatchScheduler::new(Arc::clone(&self.inner), epoch, config, processor)
            .run()
            .await;
        guard.disarm();

        let completed = {
            let mut core = self.inner.lock();
            let still_running = core.state == QueueState::Processing && core.run_epoch == epoch;
            if exit == SchedulerExit::Drained && still_running && !core.store.has_active() {
                core.state = QueueState::Completed;
                core.finished_at = Some(Utc::now());
                Some(core.summary())
            } else {
                None
            }
        };

        match completed {
            Some(report) => {
                info!(
                    "Queue completed: {} successful, {} failed, {} skipped of {}",
                    report.successful, report.failed, report.skipped, report.total
                );
                self.inner.publish(QueueEvent::StateChange {
                    from: QueueState::Processing,
                    to: QueueState::Completed,
                });
                self.inner.publish(QueueEvent::Completed(report.clone()));
                Ok(report)
            }
            None => {
                let report = self.get_summary();
                info!("Queue run stopped in state {}", report.state);
                Ok(report)
            }
        }
    }

    /// Stops drawing new batches; returns whether the queue was processing.
    pub fn pause(&self) -> bool {
        self.transition(&[QueueState::Processing], QueueState::Paused)
    }

    /// Continues a paused run until it drains, is paused or is cancelled.
    ///
    /// Has no effect unless the queue is paused.
    pub async fn resume(&self) -> Result<SummaryReport> {
        if self.state() != QueueState::Paused {
            debug!("resume() ignored: queue is {}", self.state());
            return Ok(self.get_summary());
        }
        self.start(None).await
    }

    /// Cancels the run; returns whether the queue was in a cancellable state.
    ///
    /// In-flight items still settle, but no `completed` event follows.
    pub fn cancel(&self) -> bool {
        self.transition(
            &[QueueState::Idle, QueueState::Processing, QueueState::Paused],
            QueueState::Cancelled,
        )
    }

    /// Clears every item and returns the queue to `idle`.
    pub fn reset(&self) {
        {
            let mut core = self.inner.lock();
            core.store.clear();
            core.state = QueueState::Idle;
            core.run_epoch += 1;
            core.started_at = None;
            core.finished_at = None;
        }
        info!("Queue reset");
        self.inner.publish(QueueEvent::Reset);
        self.inner.wakeup.notify_one();
    }

    pub fn get_progress(&self) -> ProgressSnapshot {
        progress::snapshot(&self.inner.lock().store)
    }

    pub fn get_summary(&self) -> SummaryReport {
        self.inner.lock().summary()
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn config(&self) -> QueueConfig {
        self.inner.lock().config.clone()
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.inner.lock().store.iter().cloned().collect()
    }

    pub fn get_item(&self, id: ItemId) -> Option<WorkItem> {
        self.inner.lock().store.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().store.is_empty()
    }

    pub fn subscribe<F>(&self, topic: QueueTopic, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, topic: QueueTopic, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(topic, id)
    }

    pub fn event_stats(&self) -> EventBusStats {
        self.inner.events.stats()
    }

    fn transition(&self, allowed: &[QueueState], to: QueueState) -> bool {
        let from = {
            let mut core = self.inner.lock();
            if !allowed.contains(&core.state) {
                debug!("Ignoring transition to {}: queue is {}", to, core.state);
                return false;
            }
            let from = core.state;
            core.state = to;
            if to.is_terminal() {
                core.finished_at = Some(Utc::now());
            }
            from
        };

        info!("Queue state changed: {} -> {}", from, to);
        self.inner.publish(QueueEvent::StateChange { from, to });
        self.inner.wakeup.notify_one();
        true
    }
}

/// Pauses a run whose `start()` future was dropped mid-run, so that the
/// queue is not left in `processing` with no loop driving it.
struct RunGuard<'a> {
    inner: &'a QueueInner,
    epoch: u64,
    armed: bool,
}

impl RunGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let abandoned = {
            let mut core = self.inner.lock();
            let current = core.state == QueueState::Processing && core.run_epoch == self.epoch;
            if current {
                core.state = QueueState::Paused;
            }
            current
        };

        if abandoned {
            warn!("Queue run was dropped before it finished; pausing");
            self.inner.publish(QueueEvent::StateChange {
                from: QueueState::Processing,
                to: QueueState::Paused,
            });
            self.inner.wakeup.notify_one();
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new_default()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("WorkQueue")
            .field("state", &core.state)
            .field("items", &core.store.len())
            .field("config", &core.config)
            .finish()
    }
}
