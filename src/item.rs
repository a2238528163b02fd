//! Work items and the ordered store that holds them.
//!
//! The [`ItemStore`] is the only mutable collection the queue owns. It keeps
//! items in enqueue order (which is also the order of the summary report) and
//! hands out pending items to the scheduler in draw order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub type ItemId = Uuid;

/// Lifecycle status of a single work item.
///
/// `Pending` and `InFlight` are the active states; the other three are
/// terminal and never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::InFlight)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in_flight",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: ItemId,
    pub payload: Value,
    pub status: ItemStatus,
    /// Number of times the item has been handed to the processor.
    pub attempts: u32,
    /// Processor output, set only once the item is `Completed`.
    pub result: Option<Value>,
    /// Final failure message, set only once the item is `Failed`.
    pub error: Option<String>,
    /// Most recent failure message, including retried failures.
    pub last_error: Option<String>,
    /// Reason reported by the processor for a `Skipped` item.
    pub skip_reason: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) draw_seq: u64,
}

impl WorkItem {
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            status: ItemStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            last_error: None,
            skip_reason: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            draw_seq: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Conversion of "one or many" payloads into a flat list.
///
/// A JSON array is treated as a list of payloads; any other value, string or
/// collection element is a single payload.
pub trait IntoPayloads {
    fn into_payloads(self) -> Vec<Value>;
}

impl IntoPayloads for Value {
    fn into_payloads(self) -> Vec<Value> {
        match self {
            Value::Array(values) => values,
            other => vec![other],
        }
    }
}

impl IntoPayloads for &str {
    fn into_payloads(self) -> Vec<Value> {
        vec![Value::from(self)]
    }
}

impl IntoPayloads for String {
    fn into_payloads(self) -> Vec<Value> {
        vec![Value::from(self)]
    }
}

impl<T: Into<Value>> IntoPayloads for Vec<T> {
    fn into_payloads(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Value>, const N: usize> IntoPayloads for [T; N] {
    fn into_payloads(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Ordered, in-memory collection of work items.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: Vec<WorkItem>,
    next_seq: u64,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new pending item and returns a copy of it.
    pub fn push(&mut self, payload: Value) -> WorkItem {
        let mut item = WorkItem::new(payload);
        item.draw_seq = self.take_seq();
        self.items.push(item.clone());
        item
    }

    pub fn remove(&mut self, id: ItemId) -> Option<WorkItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    /// Removes every item, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        cleared
    }

    pub fn get(&self, id: ItemId) -> Option<&WorkItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut WorkItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    /// True while any item is pending or in flight.
    pub fn has_active(&self) -> bool {
        self.items.iter().any(WorkItem::is_active)
    }

    /// Draws up to `limit` pending items in draw order, marking each one
    /// in flight and counting the attempt.
    pub fn draw_pending(&mut self, limit: usize) -> Vec<WorkItem> {
        if limit == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, usize)> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == ItemStatus::Pending)
            .map(|(index, item)| (item.draw_seq, index))
            .collect();
        candidates.sort_unstable();

        let now = Utc::now();
        candidates
            .into_iter()
            .take(limit)
            .map(|(_, index)| {
                let item = &mut self.items[index];
                item.status = ItemStatus::InFlight;
                item.attempts += 1;
                item.started_at = Some(now);
                item.clone()
            })
            .collect()
    }

    /// Puts an item back into the draw pool behind everything already waiting.
    pub(crate) fn requeue(&mut self, id: ItemId) -> bool {
        let seq = self.take_seq();
        match self.get_mut(id) {
            Some(item) => {
                item.status = ItemStatus::Pending;
                item.draw_seq = seq;
                true
            }
            None => false,
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
