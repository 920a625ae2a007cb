//! Hashing - SHA-256 Fingerprints of Configuration Documents
//!
//! Used to tell whether an open presentation changed since it was last
//! loaded or saved. Two documents with the same content but a different key
//! order fingerprint identically.

use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{:02x}", byte);
        out
    })
}

/// Compact JSON with object keys sorted at every depth. Array order is kept.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(value)?);
    serde_json::to_string(&value)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonicalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Fingerprint of a serialized configuration document.
///
/// `document` is the JSON an engine writes into its configuration file;
/// whitespace and key order do not affect the result.
pub fn configuration_fingerprint(document: &[u8]) -> Result<String, serde_json::Error> {
    let value: Value = serde_json::from_slice(document)?;
    Ok(sha256_hex(canonical_json(&value)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"slides": [], "id": 2, "variables": [{"value": "QQ==", "name": "a"}]});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"id":2,"slides":[],"variables":[{"name":"a","value":"QQ=="}]}"#);
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"presentation";
        assert_eq!(sha256_hex(data), sha256_hex(data));
        assert_eq!(sha256_hex(data).len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_layout() {
        let compact = br#"{"presentation":{"id":1,"slides":[]}}"#;
        let pretty = b"{\n  \"presentation\": {\n    \"slides\": [],\n    \"id\": 1\n  }\n}";
        assert_eq!(
            configuration_fingerprint(compact).unwrap(),
            configuration_fingerprint(pretty).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = configuration_fingerprint(br#"{"presentation":{"id":1}}"#).unwrap();
        let b = configuration_fingerprint(br#"{"presentation":{"id":2}}"#).unwrap();
        assert_ne!(a, b);
        assert!(configuration_fingerprint(b"not json").is_err());
    }
}
