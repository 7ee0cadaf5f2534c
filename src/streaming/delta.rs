//! Folding of incremental chunk deltas into one cumulative object.

use serde_json::{Map, Value};

/// Merge `delta` into `accumulated` in place.
///
/// Text values are appended, nested objects are merged key by key and
/// everything else (numbers, booleans, null, arrays, or a type mismatch)
/// replaces the accumulated value. Merging is not idempotent: replaying
/// the same text delta appends it twice.
pub fn merge_delta(accumulated: &mut Map<String, Value>, delta: &Map<String, Value>) {
    for (key, value) in delta {
        match (accumulated.get_mut(key), value) {
            (Some(Value::String(existing)), Value::String(fragment)) => {
                existing.push_str(fragment);
            }
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_delta(existing, nested);
            }
            (Some(existing), _) => {
                *existing = value.clone();
            }
            (None, _) => {
                accumulated.insert(key.clone(), value.clone());
            }
        }
    }
}
