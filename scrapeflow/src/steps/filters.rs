//! Output filters.
//!
//! A value failing a filter is a normal empty outcome, not a fault.

use regex::Regex;
use serde_json::Value;

/// A predicate applied to a step's output values before they are emitted.
pub enum OutputFilter {
    /// An arbitrary closure predicate.
    Predicate(Box<dyn Fn(&Value) -> bool + Send + Sync>),
    /// Passes string values matching the pattern.
    Matches(Regex),
    /// Passes mapping values whose string entry under `key` matches the
    /// pattern.
    KeyMatches {
        /// The mapping key to inspect.
        key: String,
        /// The pattern the entry must match.
        pattern: Regex,
    },
}

impl OutputFilter {
    /// Creates a closure-based filter.
    #[must_use]
    pub fn predicate(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Box::new(predicate))
    }

    /// Creates a filter matching string values against a pattern.
    #[must_use]
    pub fn matches(pattern: Regex) -> Self {
        Self::Matches(pattern)
    }

    /// Creates a filter matching one mapping entry against a pattern.
    #[must_use]
    pub fn key_matches(key: impl Into<String>, pattern: Regex) -> Self {
        Self::KeyMatches {
            key: key.into(),
            pattern,
        }
    }

    /// Returns true if the value passes this filter.
    #[must_use]
    pub fn passes(&self, value: &Value) -> bool {
        match self {
            Self::Predicate(predicate) => predicate(value),
            Self::Matches(pattern) => value.as_str().is_some_and(|s| pattern.is_match(s)),
            Self::KeyMatches { key, pattern } => value
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| pattern.is_match(s)),
        }
    }
}

impl std::fmt::Debug for OutputFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Predicate(_) => f.debug_tuple("Predicate").finish(),
            Self::Matches(pattern) => f.debug_tuple("Matches").field(pattern).finish(),
            Self::KeyMatches { key, pattern } => f
                .debug_struct("KeyMatches")
                .field("key", key)
                .field("pattern", pattern)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_filter() {
        let filter = OutputFilter::predicate(|v| v.as_i64().is_some_and(|n| n > 10));
        assert!(filter.passes(&json!(11)));
        assert!(!filter.passes(&json!(10)));
        assert!(!filter.passes(&json!("eleven")));
    }

    #[test]
    fn test_matches_filter() {
        #[allow(clippy::unwrap_used)]
        let filter = OutputFilter::matches(Regex::new(r"^https://").unwrap());
        assert!(filter.passes(&json!("https://example.com")));
        assert!(!filter.passes(&json!("http://example.com")));
        assert!(!filter.passes(&json!(42)));
    }

    #[test]
    fn test_key_matches_filter() {
        #[allow(clippy::unwrap_used)]
        let filter = OutputFilter::key_matches("url", Regex::new(r"\.pdf$").unwrap());
        assert!(filter.passes(&json!({"url": "report.pdf"})));
        assert!(!filter.passes(&json!({"url": "index.html"})));
        assert!(!filter.passes(&json!("report.pdf")));
    }
}
