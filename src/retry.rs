//! Retry budget decisions and per-item settlement.
//!
//! Every processor outcome is settled through a [`RetryController`]: a
//! success completes the item, a skip terminates it, and a failure either
//! returns it to the draw pool or, once the budget is spent, fails it for good.
//!
//! # Examples
//!
//! ```rust
//! use batchwork::retry::{RetryController, RetryVerdict};
//!
//! let controller = RetryController::new(3);
//! assert_eq!(controller.verdict(1), RetryVerdict::Retry);
//! assert_eq!(controller.verdict(2), RetryVerdict::Retry);
//! assert_eq!(controller.verdict(3), RetryVerdict::Exhausted);
//! ```

use crate::{
    BatchworkError,
    item::{ItemId, ItemStatus, ItemStore, WorkItem},
    processor::ProcessOutput,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryVerdict {
    /// Attempts remain; the item goes back to the draw pool.
    Retry,
    /// The budget is spent; the failure is terminal.
    Exhausted,
}

/// How an attempt was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Completed,
    Skipped,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    budget: u32,
}

impl RetryController {
    pub fn new(budget: u32) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Verdict for a failure on the given attempt number.
    ///
    /// A budget of zero still allows the first attempt; its failure is terminal.
    pub fn verdict(&self, attempts: u32) -> RetryVerdict {
        if attempts < self.budget {
            RetryVerdict::Retry
        } else {
            RetryVerdict::Exhausted
        }
    }

    /// Applies a processor outcome to the item in the store.
    ///
    /// Returns `None` when the item is no longer in flight, e.g. it was
    /// removed or the queue was reset while the processor was running.
    pub fn settle(
        &self,
        store: &mut ItemStore,
        id: ItemId,
        outcome: Result<ProcessOutput, BatchworkError>,
    ) -> Option<(Settlement, WorkItem)> {
        let item = store.get_mut(id)?;
        if item.status != ItemStatus::InFlight {
            debug!("Ignoring outcome for item {} in status {}", id, item.status);
            return None;
        }

        let settlement = match outcome {
            Ok(ProcessOutput::Completed(output)) => {
                item.status = ItemStatus::Completed;
                item.result = Some(output);
                item.finished_at = Some(Utc::now());
                Settlement::Completed
            }
            Ok(ProcessOutput::Skipped(reason)) => {
                debug!("Item {} skipped: {}", id, reason);
                item.status = ItemStatus::Skipped;
                item.skip_reason = Some(reason);
                item.finished_at = Some(Utc::now());
                Settlement::Skipped
            }
            Err(error) => {
                let message = error.item_message();
                item.last_error = Some(message.clone());

                match self.verdict(item.attempts) {
                    RetryVerdict::Retry => {
                        info!(
                            "Item {} failed on attempt {}/{}, retrying: {}",
                            id, item.attempts, self.budget, message
                        );
                        store.requeue(id);
                        Settlement::Retrying
                    }
                    RetryVerdict::Exhausted => {
                        warn!(
                            "Item {} failed after {} attempts: {}",
                            id, item.attempts, message
                        );
                        item.status = ItemStatus::Failed;
                        item.error = Some(message);
                        item.finished_at = Some(Utc::now());
                        Settlement::Failed
                    }
                }
            }
        };

        store.get(id).cloned().map(|item| (settlement, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn in_flight(store: &mut ItemStore) -> ItemId {
        let id = store.push(json!("https://shop.example.com/p/1")).id;
        store.draw_pending(1);
        id
    }

    #[test]
    fn test_verdicts() {
        let controller = RetryController::new(2);
        assert_eq!(controller.verdict(0), RetryVerdict::Retry);
        assert_eq!(controller.verdict(1), RetryVerdict::Retry);
        assert_eq!(controller.verdict(2), RetryVerdict::Exhausted);
        assert_eq!(controller.verdict(3), RetryVerdict::Exhausted);

        let no_retries = RetryController::new(0);
        assert_eq!(no_retries.verdict(1), RetryVerdict::Exhausted);
    }

    #[test]
    fn test_success_completes_item() {
        let mut store = ItemStore::new();
        let id = in_flight(&mut store);

        let (settlement, item) = RetryController::new(3)
            .settle(&mut store, id, Ok(ProcessOutput::Completed(json!({"sku": "A1"}))))
            .unwrap();

        assert_eq!(settlement, Settlement::Completed);
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.result, Some(json!({"sku": "A1"})));
        assert!(item.error.is_none());
        assert!(item.finished_at.is_some());
    }

    #[test]
    fn test_retryable_failure_requeues() {
        let mut store = ItemStore::new();
        let id = in_flight(&mut store);

        let (settlement, item) = RetryController::new(3)
            .settle(&mut store, id, Err(BatchworkError::processing("HTTP 503")))
            .unwrap();

        assert_eq!(settlement, Settlement::Retrying);
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 503"));
        assert!(item.error.is_none());
        assert_eq!(item.attempts, 1);
    }

    #[test]
    fn test_exhausted_failure_is_terminal() {
        let mut store = ItemStore::new();
        let id = in_flight(&mut store);
        let controller = RetryController::new(1);

        let (settlement, item) = controller
            .settle(&mut store, id, Err(BatchworkError::processing("HTTP 404")))
            .unwrap();
        assert_eq!(settlement, Settlement::Failed);
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.error.as_deref(), Some("HTTP 404"));

        // A terminal item never settles again.
        assert!(
            controller
                .settle(&mut store, id, Ok(ProcessOutput::Completed(json!(null))))
                .is_none()
        );
        assert_eq!(store.get(id).unwrap().status, ItemStatus::Failed);
    }

    #[test]
    fn test_skip_is_terminal() {
        let mut store = ItemStore::new();
        let id = in_flight(&mut store);

        let (settlement, item) = RetryController::new(3)
            .settle(&mut store, id, Ok(ProcessOutput::Skipped("duplicate".into())))
            .unwrap();
        assert_eq!(settlement, Settlement::Skipped);
        assert_eq!(item.status, ItemStatus::Skipped);
        assert_eq!(item.skip_reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn test_removed_item_is_ignored() {
        let mut store = ItemStore::new();
        let id = in_flight(&mut store);
        store.remove(id);

        assert!(
            RetryController::new(3)
                .settle(&mut store, id, Err(BatchworkError::processing("late")))
                .is_none()
        );
    }
}
