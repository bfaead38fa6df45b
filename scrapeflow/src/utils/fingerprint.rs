//! Value fingerprinting for uniqueness filters.

use md5::{Digest, Md5};
use serde_json::Value;

/// Computes a deduplication key for a resolved input or output value.
///
/// Mapping keys are sorted recursively before hashing so that two mappings
/// with the same entries in different order fingerprint identically.
#[must_use]
pub fn fingerprint(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
