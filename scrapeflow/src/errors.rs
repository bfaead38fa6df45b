//! Error types for the scrapeflow framework.
//!
//! Faults raised inside a step's transform propagate through the lazy
//! output stream as `Err` items and terminate that stream. Filtering
//! outcomes (uniqueness rejection, failed output filters, a group's input
//! guard) are empty sequences, never errors.

use thiserror::Error;

/// The main error type for scrapeflow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A step's transform failed for the current input.
    #[error("step execution error: {0}")]
    StepExecution(String),

    /// Construction-time misuse, e.g. registering a step under an empty
    /// or already-taken key. Leaves no partial pipeline state behind.
    #[error("invalid step registration: {0}")]
    InvalidStep(String),

    /// A loader collaborator failed or was missing.
    #[error("loader error: {0}")]
    Loader(String),

    /// A store collaborator failed to persist a record.
    #[error("store error: {0}")]
    Store(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Creates a step execution error from any displayable cause.
    #[must_use]
    pub fn step(message: impl Into<String>) -> Self {
        Self::StepExecution(message.into())
    }
}
