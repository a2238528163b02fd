//! # Batchwork
//!
//! An in-process work queue that runs items through an async processor in
//! bounded-concurrency batches, with per-item retry, pause/resume/cancel and
//! progress events.
//!
//! ## Features
//!
//! - **Batched concurrency**: at most `concurrency` items are in flight at once
//! - **Per-item retry**: failed items are re-drawn until their retry budget is spent
//! - **Cooperative control**: pause, resume and cancel take effect between batches
//! - **Timeouts**: optional per-item processing deadline
//! - **Events**: synchronous publish/subscribe for queue, item and state changes
//! - **Reports**: live progress snapshots and end-of-run summaries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batchwork::{
//!     QueueConfig, QueueEvent, QueueTopic, WorkQueue,
//!     processor::{ProcessOutput, processor},
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> batchwork::Result<()> {
//!     let queue = WorkQueue::new(QueueConfig::new().with_concurrency(3).with_retry_budget(2))
//!         .with_processor(processor(|payload, options| async move {
//!             // Fetch and import the product page here
//!             Ok(ProcessOutput::completed(json!({
//!                 "url": payload,
//!                 "attempt": options.attempt,
//!             })))
//!         }));
//!
//!     queue.subscribe(QueueTopic::Progress, |event| {
//!         if let QueueEvent::Progress(progress) = event {
//!             println!("{}% ({}/{})", progress.percentage, progress.processed, progress.total);
//!         }
//!         Ok(())
//!     });
//!
//!     queue.add_to_queue(json!([
//!         "https://shop.example.com/products/1",
//!         "https://shop.example.com/products/2",
//!     ]));
//!
//!     let report = queue.start(None).await?;
//!     println!("{} of {} imported", report.successful, report.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Items
//!
//! Each [`WorkItem`] wraps an opaque JSON payload with a unique id, a status
//! (`pending`, `in_flight`, `completed`, `failed` or `skipped`), an attempt
//! count and its result or error.
//!
//! ### Runs
//!
//! [`WorkQueue::start`] drains the queue in batches. A batch is drawn from the
//! pending items, processed concurrently and fully settled before the next
//! batch is drawn. Retried items go back to the end of the pending order.
//!
//! ### Events
//!
//! Subscribers receive [`QueueEvent`]s on the thread that caused them. A
//! failing or panicking handler never affects the queue or other handlers.

pub mod config;
pub mod error;
pub mod events;
pub mod item;
pub mod logging;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod retry;
mod scheduler;

pub use config::{BatchworkConfig, ConfigOverrides, LoggingConfig, QueueConfig};
pub use error::BatchworkError;
pub use events::{
    EventBus, EventBusStats, EventConfig, EventHandler, QueueChange, QueueEvent, QueueTopic,
    SubscriptionId,
};
pub use item::{IntoPayloads, ItemId, ItemStatus, WorkItem};
pub use processor::{ItemProcessor, ProcessOptions, ProcessOutput};
pub use progress::{ItemErrorRecord, ItemOutcome, ProgressSnapshot, SummaryReport};
pub use queue::{QueueState, WorkQueue};
pub use retry::{RetryController, RetryVerdict, Settlement};

/// Result type alias for batchwork operations.
pub type Result<T> = std::result::Result<T, BatchworkError>;
