//! Canonical JSON and SHA256 digests for specs and plans.
//!
//! Object keys are sorted by UTF-16 code units and integer-valued floats are
//! written as integers, so two documents that differ only in field order or
//! number spelling hash identically.

use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

fn normalize_numbers(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_numbers(v)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(normalize_numbers).collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if !f.is_finite() => Err(EngineError::Canonical(
                "NaN/Infinity not permitted in canonical JSON".to_string(),
            )),
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            }
            _ => Ok(serde_json::Value::Number(n.clone())),
        },
        other => Ok(other.clone()),
    }
}

/// Compact canonical JSON text of `value`.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    let normalized = normalize_numbers(value)?;
    Ok(serde_json::to_string(&sort_keys(&normalized))?)
}

/// SHA256 hex digest of the canonical JSON of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_does_not_change_digest() {
        let a = serde_json::json!({"name": "cart", "effects": [{"kind": "set_add", "body": "add(self, x)"}]});
        let b = serde_json::json!({"effects": [{"body": "add(self, x)", "kind": "set_add"}], "name": "cart"});
        assert_eq!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn test_integer_valued_floats_are_normalized() {
        let v = serde_json::json!({"lifting_fraction": 1.0, "cost": 0.5});
        assert_eq!(
            canonical_json(&v).unwrap(),
            r#"{"cost":0.5,"lifting_fraction":1}"#
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = serde_json::json!({"steps": ["shard-by-key", "weaken-consistency"]});
        let b = serde_json::json!({"steps": ["weaken-consistency", "shard-by-key"]});
        assert_ne!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let d = compute_digest(&serde_json::json!({"x": 1})).unwrap();
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
