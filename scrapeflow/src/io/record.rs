//! The ordered result mapping shared by one lineage.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use super::ValueMap;

/// An ordered mapping from string key to value, shared by every Input and
/// Output of one lineage.
///
/// Cloning a `Record` clones the handle, not the data: all clones observe
/// the same entries. A key assigned more than once accumulates as an
/// ordered sequence rather than overwriting.
#[derive(Debug, Clone, Default)]
pub struct Record {
    entries: Arc<Mutex<IndexMap<String, Value>>>,
}

impl Record {
    /// Creates a new, empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record pre-populated from a mapping, preserving its order.
    #[must_use]
    pub fn from_map(map: &ValueMap) -> Self {
        let record = Self::new();
        record.splice(map);
        record
    }

    /// Sets a value under a key.
    ///
    /// A key set more than once turns into an ordered sequence that grows
    /// by one element per assignment.
    pub fn set(&self, key: &str, value: Value) {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                entries.insert(key.to_string(), value);
            }
        }
    }

    /// Merges every key of a mapping into the record, one `set` per key.
    pub fn splice(&self, map: &ValueMap) {
        for (key, value) in map {
            self.set(key, value.clone());
        }
    }

    /// Returns the current value under a key, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Returns the number of keys in the record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the record holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns an ordered JSON object snapshot of the record.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let entries = self.entries.lock();
        let mut map = ValueMap::new();
        for (key, value) in entries.iter() {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Returns true if both handles point at the same underlying record.
    #[must_use]
    pub fn same_record(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}
