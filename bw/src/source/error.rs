//! Work source and item error types

use thiserror::Error;

/// Errors raised while fetching a batch
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while processing a single item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// Business-logic failure, isolated to this item
    #[error("Item failed: {0}")]
    Failed(String),

    /// The item observed cancellation and gave up
    #[error("Item cancelled")]
    Cancelled,
}

impl ItemError {
    /// Build a failure from anything printable
    pub fn failed(reason: impl Into<String>) -> Self {
        ItemError::Failed(reason.into())
    }

    /// Check if this error is a cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ItemError::Cancelled)
    }
}
