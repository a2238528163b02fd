use crate::queue::QueueState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchworkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot {operation} while queue is {state}")]
    InvalidState {
        operation: &'static str,
        state: QueueState,
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Item timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Event handler error: {0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {message}")]
    Logging { message: String },
}

impl BatchworkError {
    /// Shorthand for the error a processor returns when one item fails.
    pub fn processing<S: Into<String>>(message: S) -> Self {
        BatchworkError::Processing(message.into())
    }

    /// Message recorded on a work item when this error settles it.
    ///
    /// Processing errors are recorded without the variant prefix so that the
    /// summary report shows exactly what the processor said.
    pub fn item_message(&self) -> String {
        match self {
            BatchworkError::Processing(message) => message.clone(),
            BatchworkError::Timeout { duration } => format!("timed out after {:?}", duration),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for BatchworkError {
    fn from(err: toml::de::Error) -> Self {
        BatchworkError::Configuration(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for BatchworkError {
    fn from(err: toml::ser::Error) -> Self {
        BatchworkError::Configuration(format!("TOML serialization error: {}", err))
    }
}
