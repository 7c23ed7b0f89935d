//! Defaults backfill for configuration documents

use serde_json::Value;

/// Merge a persisted document over the compiled-in defaults.
///
/// - keys present in `overrides` win at the leaf level
/// - keys only present in `defaults` are injected (recursively for objects)
/// - keys only present in `overrides` are kept
/// - scalars and arrays replace wholesale
///
/// A non-object override of an object-valued default (including `null`)
/// falls back to the default, so no default section can disappear. An explicit
/// `null` over a scalar or array default is kept.
pub fn deep_merge(defaults: &Value, overrides: &Value) -> Value {
    match (defaults, overrides) {
        (Value::Object(default_map), Value::Object(override_map)) => {
            let mut merged = override_map.clone();
            for (key, default_value) in default_map {
                match merged.get_mut(key) {
                    Some(existing) => *existing = deep_merge(default_value, existing),
                    None => {
                        merged.insert(key.clone(), default_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        (Value::Object(_), _) => defaults.clone(),
        (_, other) => other.clone(),
    }
}
