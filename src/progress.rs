//! Progress snapshots and summary reports.
//!
//! Both are derived from the [`ItemStore`] on every call and never cached, so
//! a snapshot always reflects the store at the moment it was read.

use crate::{
    item::{ItemId, ItemStatus, ItemStore, WorkItem},
    queue::QueueState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-in-time view of how far a run has progressed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// successful + failed + skipped
    pub processed: usize,
    pub total: usize,
    /// Whole-number percentage of processed items, 0 for an empty queue.
    pub percentage: u8,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending_count: usize,
    pub in_flight_count: usize,
}

/// Per-item entry of a [`SummaryReport`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    pub id: ItemId,
    pub payload: Value,
    pub status: ItemStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
}

/// A terminal failure as listed in the summary's error list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemErrorRecord {
    pub id: ItemId,
    pub payload: Value,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryReport {
    pub state: QueueState,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Items still pending or in flight when the report was built.
    pub pending: usize,
    /// Whole-number percentage of successful items, 0 for an empty queue.
    pub success_rate: u8,
    pub items: Vec<ItemOutcome>,
    pub errors: Vec<ItemErrorRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SummaryReport {
    pub fn is_finished(&self) -> bool {
        matches!(self.state, QueueState::Completed | QueueState::Cancelled)
    }
}

/// Rounded percentage of `part` in `whole`; an empty whole yields 0.
pub fn percentage(part: usize, whole: usize) -> u8 {
    if whole == 0 {
        return 0;
    }
    let pct = (part as f64 / whole as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

pub fn snapshot(store: &ItemStore) -> ProgressSnapshot {
    let mut progress = ProgressSnapshot {
        total: store.len(),
        ..Default::default()
    };

    for item in store.iter() {
        match item.status {
            ItemStatus::Pending => progress.pending_count += 1,
            ItemStatus::InFlight => progress.in_flight_count += 1,
            ItemStatus::Completed => progress.successful += 1,
            ItemStatus::Failed => progress.failed += 1,
            ItemStatus::Skipped => progress.skipped += 1,
        }
    }

    progress.processed = progress.successful + progress.failed + progress.skipped;
    progress.percentage = percentage(progress.processed, progress.total);
    progress
}

/// Builds a summary report. Item fields are reported whether or not the run
/// has finished.
pub fn summary(
    state: QueueState,
    store: &ItemStore,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> SummaryReport {
    let progress = snapshot(store);

    let items = store.iter().map(outcome_of).collect();
    let errors = store
        .iter()
        .filter(|item| item.status == ItemStatus::Failed)
        .map(|item| ItemErrorRecord {
            id: item.id,
            payload: item.payload.clone(),
            attempts: item.attempts,
            message: item.error.clone().unwrap_or_default(),
        })
        .collect();

    SummaryReport {
        state,
        total: progress.total,
        successful: progress.successful,
        failed: progress.failed,
        skipped: progress.skipped,
        pending: progress.pending_count + progress.in_flight_count,
        success_rate: percentage(progress.successful, progress.total),
        items,
        errors,
        started_at,
        finished_at,
    }
}

fn outcome_of(item: &WorkItem) -> ItemOutcome {
    ItemOutcome {
        id: item.id,
        payload: item.payload.clone(),
        status: item.status,
        attempts: item.attempts,
        error: item.error.clone(),
        skip_reason: item.skip_reason.clone(),
    }
}
