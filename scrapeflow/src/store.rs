//! Destinations for finished records.

use parking_lot::Mutex;
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::Record;
use crate::logging::Logger;

/// A destination that persists each finished record exactly once,
/// during the run that produced it.
#[cfg_attr(test, mockall::automock)]
pub trait Store: Send + Sync {
    /// Persists one record.
    ///
    /// # Errors
    ///
    /// Fails with [`FlowError::Store`] when the record cannot be written.
    fn store(&self, record: &Record) -> Result<(), FlowError>;

    /// Receives the run's logger when the store is registered.
    fn add_logger(&mut self, logger: Arc<dyn Logger>) {
        let _ = logger;
    }
}

/// An in-memory store that keeps a snapshot of every record it receives.
/// Mostly useful in tests and small extraction scripts.
#[derive(Debug, Default)]
pub struct CollectingStore {
    snapshots: Mutex<Vec<Value>>,
}

impl CollectingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all stored records as mapping values, in arrival order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Value> {
        self.snapshots.lock().clone()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Returns true if no record has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl Store for CollectingStore {
    fn store(&self, record: &Record) -> Result<(), FlowError> {
        self.snapshots.lock().push(record.to_value());
        Ok(())
    }
}

/// Appends each record as one JSON object per line.
pub struct JsonLinesStore {
    file: Mutex<File>,
    logger: Option<Arc<dyn Logger>>,
}

impl JsonLinesStore {
    /// Creates the target file, truncating an existing one.
    ///
    /// # Errors
    ///
    /// Fails with [`FlowError::Io`] when the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let file = File::create(path)?;
        Ok(Self {
            file: Mutex::new(file),
            logger: None,
        })
    }
}

impl Store for JsonLinesStore {
    fn store(&self, record: &Record) -> Result<(), FlowError> {
        let line = serde_json::to_string(&record.to_value())?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").map_err(|e| FlowError::Store(e.to_string()))?;

        if let Some(logger) = &self.logger {
            logger.debug("stored one record");
        }
        Ok(())
    }

    fn add_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }
}

impl std::fmt::Debug for JsonLinesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_collecting_store_keeps_snapshots_in_order() {
        let store = CollectingStore::new();

        let first = Record::new();
        first.set("title", json!("one"));
        let second = Record::new();
        second.set("title", json!("two"));

        store.store(&first).unwrap_or_else(|e| panic!("store: {e}"));
        store.store(&second).unwrap_or_else(|e| panic!("store: {e}"));

        assert_eq!(
            store.snapshots(),
            vec![json!({"title": "one"}), json!({"title": "two"})]
        );
    }

    #[test]
    fn test_snapshot_is_detached_from_the_live_record() {
        let store = CollectingStore::new();
        let record = Record::new();
        record.set("n", json!(1));
        store.store(&record).unwrap_or_else(|e| panic!("store: {e}"));

        record.set("n", json!(2));
        assert_eq!(store.snapshots(), vec![json!({"n": 1})]);
    }

    #[test]
    fn test_json_lines_store_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("records.jsonl");

        let store = JsonLinesStore::create(&path).unwrap_or_else(|e| panic!("create: {e}"));
        let record = Record::new();
        record.set("url", json!("https://example.com"));
        record.set("status", json!(200));
        store.store(&record).unwrap_or_else(|e| panic!("store: {e}"));

        let contents = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read: {e}"));
        assert_eq!(
            contents,
            "{\"url\":\"https://example.com\",\"status\":200}\n"
        );
    }
}
