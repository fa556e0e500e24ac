//! Accretive metadata merging.
//!
//! `AudioFile.metadata` is only ever merged into, never replaced. Nested
//! objects merge key by key; any other value in the patch replaces the
//! stored value for that key.

use serde_json::{Map, Value};

/// Merges `patch` into `target` in place.
pub fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Returns `base` with `patch` merged in.
pub fn merged(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    merge(&mut out, patch);
    out
}
