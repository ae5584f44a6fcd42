//! Canonical JSON serialization and hashing.
//!
//! The snapshot digest depends on every byte of the serialized entity
//! form, so serialization must be deterministic: object keys sorted at
//! every level, compact separators, UTF-8 bytes, SHA-256 in lowercase
//! hex. Nesting is capped; exceeding the cap is a hard error, never a
//! silent truncation.

use crate::error::{CoreError, CoreResult};
use entivc_protocol::FieldMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Maximum nesting depth of container values inside an entity payload.
pub const MAX_VALUE_DEPTH: usize = 3;

/// Renders bytes as lowercase hex.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Computes the SHA-256 of the input, rendered as lowercase hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex_digest(&Sha256::digest(data))
}

/// Validates the nesting depth of a single payload value.
///
/// Field values sit at depth 1; a container at depth [`MAX_VALUE_DEPTH`]
/// may hold only scalars.
pub fn validate_value_depth(value: &Value, depth: usize) -> CoreResult<()> {
    match value {
        Value::Object(map) => {
            if depth > MAX_VALUE_DEPTH {
                return Err(CoreError::DepthExceeded {
                    max: MAX_VALUE_DEPTH,
                });
            }
            for nested in map.values() {
                validate_value_depth(nested, depth + 1)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            if depth > MAX_VALUE_DEPTH {
                return Err(CoreError::DepthExceeded {
                    max: MAX_VALUE_DEPTH,
                });
            }
            for item in items {
                validate_value_depth(item, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Validates the nesting depth of every value in a field map.
pub fn validate_field_map(map: &FieldMap) -> CoreResult<()> {
    for value in map.values() {
        validate_value_depth(value, 1)?;
    }
    Ok(())
}

/// Serializes a field map to its canonical JSON string.
///
/// The map type keeps keys sorted at every level, so a plain compact
/// serialization is already canonical once the depth cap holds.
pub fn canonical_json(map: &FieldMap) -> CoreResult<String> {
    validate_field_map(map)?;
    serde_json::to_string(map)
        .map_err(|e| CoreError::invalid_entity(format!("serialization failed: {e}")))
}

/// Computes the SHA-256 hex digest of a field map's canonical JSON.
pub fn field_map_hash(map: &FieldMap) -> CoreResult<String> {
    Ok(sha256_hex(canonical_json(map)?.as_bytes()))
}

/// Depth-capped structural equality of two optional values.
///
/// `None` compares equal only to `None`. Exceeding the depth cap is an
/// error, matching the serialization contract.
pub fn deep_equal(a: Option<&Value>, b: Option<&Value>) -> CoreResult<bool> {
    match (a, b) {
        (None, None) => Ok(true),
        (Some(a), Some(b)) => values_equal(a, b, 1),
        _ => Ok(false),
    }
}

fn values_equal(a: &Value, b: &Value, depth: usize) -> CoreResult<bool> {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            if depth > MAX_VALUE_DEPTH {
                return Err(CoreError::DepthExceeded {
                    max: MAX_VALUE_DEPTH,
                });
            }
            if a.len() != b.len() {
                return Ok(false);
            }
            for (key, a_val) in a {
                match b.get(key) {
                    Some(b_val) if values_equal(a_val, b_val, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Array(a), Value::Array(b)) => {
            if depth > MAX_VALUE_DEPTH {
                return Err(CoreError::DepthExceeded {
                    max: MAX_VALUE_DEPTH,
                });
            }
            if a.len() != b.len() {
                return Ok(false);
            }
            for (a_item, b_item) in a.iter().zip(b) {
                if !values_equal(a_item, b_item, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(a == b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> FieldMap {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let m = map(json!({"b": 1, "a": {"z": true, "c": "x"}}));
        assert_eq!(canonical_json(&m).unwrap(), r#"{"a":{"c":"x","z":true},"b":1}"#);
    }

    #[test]
    fn canonical_json_preserves_array_order() {
        let m = map(json!({"items": [3, 1, 2]}));
        assert_eq!(canonical_json(&m).unwrap(), r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn depth_cap_allows_mappings_three_deep() {
        let m = map(json!({"a": {"b": {"c": {"d": 1}}}}));
        assert!(canonical_json(&m).is_ok());
    }

    #[test]
    fn depth_cap_rejects_mappings_four_deep() {
        let m = map(json!({"a": {"b": {"c": {"d": {"e": 1}}}}}));
        assert!(matches!(
            canonical_json(&m),
            Err(CoreError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let digest = sha256_hex(b"");
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_changes_with_content() {
        let a = field_map_hash(&map(json!({"name": "a"}))).unwrap();
        let b = field_map_hash(&map(json!({"name": "b"}))).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn deep_equal_basics() {
        let a = json!({"x": [1, 2], "y": "s"});
        let b = json!({"y": "s", "x": [1, 2]});
        assert!(deep_equal(Some(&a), Some(&b)).unwrap());

        let c = json!({"x": [2, 1], "y": "s"});
        assert!(!deep_equal(Some(&a), Some(&c)).unwrap());

        assert!(deep_equal(None, None).unwrap());
        assert!(!deep_equal(Some(&a), None).unwrap());
    }

    #[test]
    fn deep_equal_depth_cap() {
        let a = json!({"a": {"b": {"c": {"d": 1}}}});
        assert!(deep_equal(Some(&a), Some(&a)).is_err());
    }
}
