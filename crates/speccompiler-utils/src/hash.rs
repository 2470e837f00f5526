//! Stable SHA-1 content hashing
//!
//! Every cache key, render output filename and emitted-artifact fingerprint
//! in the system is a lowercase hex SHA-1 digest produced here. Structured
//! values are canonicalized (object keys sorted) before hashing so that two
//! semantically identical values always share a digest.

use serde_json::Value;
use sha1::{Digest, Sha1};

/// Hash raw bytes to a 40-character lowercase hex digest.
#[must_use]
pub fn sha1_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a string slice.
#[must_use]
pub fn sha1_str(content: &str) -> String {
    sha1_bytes(content.as_bytes())
}

/// Hash a JSON value over its canonical serialization.
///
/// Object keys are emitted in sorted order at every nesting level, so the
/// digest does not depend on insertion order.
#[must_use]
pub fn sha1_json(value: &Value) -> String {
    let mut buf = String::new();
    canonical_json(value, &mut buf);
    sha1_str(&buf)
}

fn canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            out.push_str(&value.to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_json(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonical_json(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn known_digest() {
        // sha1("abc")
        assert_eq!(sha1_str("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn bytes_and_str_agree() {
        assert_eq!(sha1_bytes(b"content"), sha1_str("content"));
    }

    #[test]
    fn json_key_order_is_irrelevant() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(sha1_json(&a), sha1_json(&b));
    }

    #[test]
    fn json_values_differ() {
        assert_ne!(sha1_json(&json!({"a": 1})), sha1_json(&json!({"a": 2})));
    }

    proptest! {
        #[test]
        fn digest_is_stable(content in ".*") {
            prop_assert_eq!(sha1_str(&content), sha1_str(&content));
            prop_assert_eq!(sha1_str(&content).len(), 40);
        }
    }
}
