//! Logger collaborator trait and implementations.
//!
//! Loggers are fire-and-forget sinks; a step without a logger is legal and
//! simply stays quiet.

use parking_lot::Mutex;

/// Trait for logging sinks consumed by steps, stores, and the driver.
pub trait Logger: Send + Sync {
    /// Logs an informational message.
    fn info(&self, message: &str);

    /// Logs a debug message.
    fn debug(&self, message: &str);

    /// Logs a warning.
    fn warn(&self, message: &str);
}

/// A logger backed by the `tracing` framework.
///
/// This is the production default used by the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// A collecting logger for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingLogger {
    messages: Mutex<Vec<(String, String)>>,
}

impl CollectingLogger {
    /// Creates a new collecting logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected `(level, message)` pairs.
    #[must_use]
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    /// Returns messages logged at the given level.
    #[must_use]
    pub fn messages_of_level(&self, level: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(l, _)| l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Returns the number of collected messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Returns true if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Clears all collected messages.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    fn push(&self, level: &str, message: &str) {
        self.messages
            .lock()
            .push((level.to_string(), message.to_string()));
    }
}

impl Logger for CollectingLogger {
    fn info(&self, message: &str) {
        self.push("info", message);
    }

    fn debug(&self, message: &str) {
        self.push("debug", message);
    }

    fn warn(&self, message: &str) {
        self.push("warn", message);
    }
}

/// Installs an env-filtered `tracing` subscriber for binary consumers.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_logger() {
        let logger = CollectingLogger::new();
        assert!(logger.is_empty());

        logger.info("started");
        logger.debug("details");
        logger.warn("careful");

        assert_eq!(logger.len(), 3);
        assert_eq!(logger.messages_of_level("warn"), vec!["careful".to_string()]);

        logger.clear();
        assert!(logger.is_empty());
    }

    #[test]
    fn test_tracing_logger_does_not_panic() {
        let logger = TracingLogger;
        logger.info("info");
        logger.debug("debug");
        logger.warn("warn");
    }
}
