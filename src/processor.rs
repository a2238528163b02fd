//! The processor collaborator that turns one payload into a result.
//!
//! A processor is an async function shared by every concurrent task of a run.
//! It receives the item payload and a [`ProcessOptions`] describing the attempt,
//! and reports either an output, a skip, or an error.
//!
//! # Examples
//!
//! ```rust
//! use batchwork::{BatchworkError, processor::{processor, ItemProcessor, ProcessOutput}};
//! use serde_json::json;
//!
//! let importer: ItemProcessor = processor(|payload, options| async move {
//!     let url = payload.as_str().unwrap_or_default().to_string();
//!     if url.is_empty() {
//!         return Err(BatchworkError::processing("payload is not a URL"));
//!     }
//!     Ok(ProcessOutput::Completed(json!({"url": url, "attempt": options.attempt})))
//! });
//! ```

use crate::{Result, item::ItemId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{future::Future, pin::Pin, sync::Arc};

/// Successful outcome of processing one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutput {
    Completed(Value),
    /// The item needs no work; the reason is kept in the summary report.
    Skipped(String),
}

impl ProcessOutput {
    pub fn completed<V: Into<Value>>(output: V) -> Self {
        ProcessOutput::Completed(output.into())
    }

    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        ProcessOutput::Skipped(reason.into())
    }
}

impl From<Value> for ProcessOutput {
    fn from(output: Value) -> Self {
        ProcessOutput::Completed(output)
    }
}

/// Per-call context handed to the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub item_id: ItemId,
    /// 1-based attempt number of this call.
    pub attempt: u32,
    pub retry_budget: u32,
    /// `processor_options` from the queue configuration.
    pub options: Value,
}

pub type ProcessFuture = Pin<Box<dyn Future<Output = Result<ProcessOutput>> + Send>>;

pub type ItemProcessor = Arc<dyn Fn(Value, ProcessOptions) -> ProcessFuture + Send + Sync>;

/// Wraps an async closure as an [`ItemProcessor`].
pub fn processor<F, Fut>(f: F) -> ItemProcessor
where
    F: Fn(Value, ProcessOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProcessOutput>> + Send + 'static,
{
    Arc::new(move |payload, options| Box::pin(f(payload, options)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchworkError;
    use serde_json::json;
    use uuid::Uuid;

    fn options(attempt: u32) -> ProcessOptions {
        ProcessOptions {
            item_id: Uuid::new_v4(),
            attempt,
            retry_budget: 3,
            options: json!({"store": "main"}),
        }
    }

    #[tokio::test]
    async fn test_processor_helper() {
        let echo = processor(|payload, options| async move {
            Ok(ProcessOutput::completed(json!({
                "payload": payload,
                "attempt": options.attempt,
                "store": options.options["store"],
            })))
        });

        let output = echo(json!("https://shop.example.com/p/9"), options(2))
            .await
            .unwrap();
        assert_eq!(
            output,
            ProcessOutput::Completed(json!({
                "payload": "https://shop.example.com/p/9",
                "attempt": 2,
                "store": "main",
            }))
        );
    }

    #[tokio::test]
    async fn test_processor_errors_and_skips() {
        let picky = processor(|payload, _options| async move {
            match payload.as_str() {
                Some("dup") => Ok(ProcessOutput::skipped("already imported")),
                Some(_) => Ok(ProcessOutput::completed(payload)),
                None => Err(BatchworkError::processing("not a string")),
            }
        });

        assert_eq!(
            picky(json!("dup"), options(1)).await.unwrap(),
            ProcessOutput::Skipped("already imported".to_string())
        );
        assert!(picky(json!(42), options(1)).await.is_err());
    }
}
