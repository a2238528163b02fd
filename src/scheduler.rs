//! The batch loop that drains the item store.
//!
//! Each iteration draws up to `concurrency` pending items (fewer if items from
//! an earlier, paused run are still in flight), runs them concurrently and
//! waits for every one of them to settle before the next batch. The run state
//! is only checked between batches.

use crate::{
    BatchworkError, Result,
    config::QueueConfig,
    events::QueueEvent,
    item::{ItemStatus, WorkItem},
    processor::{ItemProcessor, ProcessOptions, ProcessOutput},
    progress,
    queue::{QueueCore, QueueInner, QueueState},
    retry::RetryController,
};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinError, time::sleep};
use tracing::{debug, error, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerExit {
    /// No item is pending or in flight.
    Drained,
    /// The run was paused, cancelled, reset or superseded by a newer run.
    Interrupted,
}

pub(crate) struct BatchScheduler {
    inner: Arc<QueueInner>,
    epoch: u64,
    config: QueueConfig,
    processor: ItemProcessor,
    retry: RetryController,
}

impl BatchScheduler {
    pub(crate) fn new(
        inner: Arc<QueueInner>,
        epoch: u64,
        config: QueueConfig,
        processor: ItemProcessor,
    ) -> Self {
        let retry = RetryController::new(config.retry_budget);
        Self {
            inner,
            epoch,
            config,
            processor,
            retry,
        }
    }

    fn is_current(&self, core: &QueueCore) -> bool {
        core.state == QueueState::Processing && core.run_epoch == self.epoch
    }

    pub(crate) async fn run(&self) -> SchedulerExit {
        loop {
            let batch = {
                let mut core = self.inner.lock();
                if !self.is_current(&core) {
                    return SchedulerExit::Interrupted;
                }
                if !core.store.has_active() {
                    return SchedulerExit::Drained;
                }
                let in_flight = core.store.count(ItemStatus::InFlight);
                let slots = self.config.concurrency.saturating_sub(in_flight);
                core.store.draw_pending(slots)
            };

            if batch.is_empty() {
                // Every slot is held by items from an earlier run; wait for
                // one of them to settle.
                self.inner.wakeup.notified().await;
                continue;
            }

            debug!("Dispatching batch of {} items", batch.len());
            self.run_batch(batch).await;

            let more = {
                let core = self.inner.lock();
                self.is_current(&core) && core.store.has_active()
            };
            if more && !self.config.inter_batch_delay.is_zero() {
                sleep(self.config.inter_batch_delay).await;
            }
        }
    }

    async fn run_batch(&self, batch: Vec<WorkItem>) {
        for item in &batch {
            self.inner.publish(QueueEvent::ItemStart { item: item.clone() });
        }

        // Each item settles in its own task so that its outcome is recorded
        // even if the caller stops awaiting the run.
        let handles: Vec<_> = batch
            .into_iter()
            .map(|item| {
                let options = ProcessOptions {
                    item_id: item.id,
                    attempt: item.attempts,
                    retry_budget: self.config.retry_budget,
                    options: self.config.processor_options.clone(),
                };
                tokio::spawn(execute_item(
                    Arc::clone(&self.inner),
                    Arc::clone(&self.processor),
                    self.retry,
                    self.config.item_timeout,
                    item,
                    options,
                ))
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Item task failed: {}", e);
            }
        }
    }
}

async fn execute_item(
    inner: Arc<QueueInner>,
    processor: ItemProcessor,
    retry: RetryController,
    item_timeout: Option<Duration>,
    item: WorkItem,
    options: ProcessOptions,
) {
    let id = item.id;
    let payload = item.payload;
    // The processor is invoked inside the task so a panic while building its
    // future is caught the same way as one while polling it.
    let call = tokio::spawn(async move { processor(payload, options).await });
    let abort = call.abort_handle();

    let outcome = match item_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                abort.abort();
                warn!("Item {} timed out after {:?}", id, limit);
                Err(BatchworkError::Timeout { duration: limit })
            }
        },
        None => flatten(call.await),
    };

    let settled = {
        let mut core = inner.lock();
        retry
            .settle(&mut core.store, id, outcome)
            .map(|(_, item)| (item, progress::snapshot(&core.store)))
    };

    if let Some((item, progress)) = settled {
        inner.publish(QueueEvent::ItemComplete { item, progress });
        inner.publish(QueueEvent::Progress(progress));
    }
    inner.wakeup.notify_one();
}

fn flatten(joined: std::result::Result<Result<ProcessOutput>, JoinError>) -> Result<ProcessOutput> {
    joined.unwrap_or_else(|e| {
        if e.is_panic() {
            Err(BatchworkError::processing("processor panicked"))
        } else {
            Err(BatchworkError::processing("processor task was cancelled"))
        }
    })
}
