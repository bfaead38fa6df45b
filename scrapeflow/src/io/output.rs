//! The value produced by one invocation of a step's transform.

use serde_json::Value;

use super::{Record, ValueMap};

/// One element of a step's lazy output sequence.
///
/// Carries the produced value, the record reference of its originating
/// input (or a freshly created one), and any deferred result data staged
/// for merge into records created further downstream.
#[derive(Debug, Clone)]
pub struct Output {
    value: Value,
    record: Option<Record>,
    deferred: ValueMap,
}

impl Output {
    /// Creates a bare output carrying only a value.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            record: None,
            deferred: ValueMap::new(),
        }
    }

    /// Creates a fully assembled output.
    #[must_use]
    pub fn assembled(value: Value, record: Option<Record>, deferred: ValueMap) -> Self {
        Self {
            value,
            record,
            deferred,
        }
    }

    /// The produced value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The record shared with the originating input, if any.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    /// Deferred result data travelling with this output.
    #[must_use]
    pub fn deferred(&self) -> &ValueMap {
        &self.deferred
    }
}
