//! Work item and dispatch outcome types

use serde::{Deserialize, Serialize};

use super::ItemError;

/// A single unit of work as handed out by a [`super::WorkSource`]
///
/// Immutable once fetched; the fields are only reachable through getters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    id: String,
    payload: serde_json::Value,
}

impl WorkItem {
    /// Create a new work item
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Create a work item with an empty payload
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::new(id, serde_json::Value::Null)
    }

    /// Opaque identifier assigned by the source
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Payload reference
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Result of dispatching one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum DispatchOutcome {
    Success,
    ItemFailure(String),
    Cancelled,
}

impl From<Result<(), ItemError>> for DispatchOutcome {
    fn from(result: Result<(), ItemError>) -> Self {
        match result {
            Ok(()) => DispatchOutcome::Success,
            Err(ItemError::Failed(reason)) => DispatchOutcome::ItemFailure(reason),
            Err(ItemError::Cancelled) => DispatchOutcome::Cancelled,
        }
    }
}
