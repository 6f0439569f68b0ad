// Copyright 2026 Covenant Labs

//! Canonical JSON encoding used anywhere a value is hashed or signed: DR
//! bodies, WORM payloads, and plan fingerprints. Keys are sorted
//! recursively and numbers use `serde_json`'s default shortest round-trip
//! formatting, which the engine treats as the fixed format (it never emits
//! NaN/Infinity, so there is no ambiguity to pin down further).

use serde_json::Value;

/// Serialize `value` with object keys sorted at every level and no
/// insignificant whitespace. Two calls on semantically-equal values with
/// differently-ordered object keys always produce identical bytes.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("Value serialization cannot fail")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
