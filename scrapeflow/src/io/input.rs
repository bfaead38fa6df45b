//! The value a step is invoked with.

use serde_json::Value;

use super::{Output, Record, ValueMap};

/// The input of one step invocation.
///
/// Carries an arbitrary structured value, an optional shared [`Record`]
/// reference, and any deferred result data staged by upstream steps. The
/// value is immutable; the record reference may be attached later by the
/// first contributing step in the lineage.
#[derive(Debug, Clone)]
pub struct Input {
    value: Value,
    record: Option<Record>,
    deferred: ValueMap,
}

impl Input {
    /// Creates a fresh input from a seed value.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            record: None,
            deferred: ValueMap::new(),
        }
    }

    /// Creates an input with an already-attached record.
    #[must_use]
    pub fn with_record(value: impl Into<Value>, record: Record) -> Self {
        Self {
            value: value.into(),
            record: Some(record),
            deferred: ValueMap::new(),
        }
    }

    /// Derives an input from a step's output, inheriting its record
    /// reference and deferred result data.
    #[must_use]
    pub fn from_output(output: &Output) -> Self {
        Self {
            value: output.value().clone(),
            record: output.record().cloned(),
            deferred: output.deferred().clone(),
        }
    }

    pub(crate) fn from_parts(value: Value, record: Option<Record>, deferred: ValueMap) -> Self {
        Self {
            value,
            record,
            deferred,
        }
    }

    /// Returns the same input with the value swapped, keeping the record
    /// reference and deferred data.
    #[must_use]
    pub(crate) fn replace_value(self, value: Value) -> Self {
        Self { value, ..self }
    }

    /// Returns the same input with a record attached.
    #[must_use]
    pub(crate) fn attach_record(self, record: Record) -> Self {
        Self {
            record: Some(record),
            ..self
        }
    }

    /// The value this input carries.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The shared record of this lineage, if one exists yet.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    /// Deferred result data staged upstream, waiting for a record.
    #[must_use]
    pub fn deferred(&self) -> &ValueMap {
        &self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_input_has_no_record() {
        let input = Input::new(json!("https://example.com"));
        assert_eq!(input.value(), &json!("https://example.com"));
        assert!(input.record().is_none());
        assert!(input.deferred().is_empty());
    }

    #[test]
    fn test_from_output_inherits_record_and_deferred() {
        let record = Record::new();
        record.set("key", json!("value"));

        let mut deferred = ValueMap::new();
        deferred.insert("later".to_string(), json!("data"));

        let output = Output::assembled(json!(1), Some(record.clone()), deferred);
        let input = Input::from_output(&output);

        assert_eq!(input.value(), &json!(1));
        assert!(input.record().is_some_and(|r| r.same_record(&record)));
        assert_eq!(input.deferred().get("later"), Some(&json!("data")));
    }

    #[test]
    fn test_replace_value_keeps_record() {
        let record = Record::new();
        let input = Input::with_record(json!({"a": 1}), record.clone());
        let resolved = input.replace_value(json!(1));

        assert_eq!(resolved.value(), &json!(1));
        assert!(resolved.record().is_some_and(|r| r.same_record(&record)));
    }
}
