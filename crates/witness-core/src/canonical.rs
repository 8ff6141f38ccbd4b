//! Canonical JSON byte encoding.
//!
//! Leaf hashes must be identical for equal JSON values regardless of key
//! insertion order, platform, or serializer version. The encoding here is
//! the usual canonical-JSON contract: object keys in code-point order, no
//! insignificant whitespace, minimal string escaping, numbers in their
//! shortest round-trip form, arrays in element order.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from canonical encoding.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// The input could not be represented as a JSON value
    /// (non-finite floats, map keys that are not strings, ...).
    #[error("value is not representable as canonical JSON: {0}")]
    Unrepresentable(String),
}

/// Convert any serializable value into canonical bytes.
///
/// # Errors
///
/// Returns [`CanonicalError::Unrepresentable`] if the value cannot be
/// expressed as JSON (for example a `f64::NAN` field).
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value =
        serde_json::to_value(value).map_err(|e| CanonicalError::Unrepresentable(e.to_string()))?;
    Ok(to_canonical_bytes(&value))
}

/// Encode an already-parsed JSON value into canonical bytes.
///
/// `serde_json::Value` is acyclic and cannot hold non-finite numbers, so
/// this encoding is total.
#[must_use]
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        // serde_json renders integers exactly and floats via ryu, which is
        // the shortest round-trip form.
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        },
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                // Key came from the map, so the lookup cannot miss.
                if let Some(v) = map.get(key.as_str()) {
                    write_value(v, out);
                }
            }
            out.push(b'}');
        },
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0C}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                let escaped = format!("\\u{:04x}", c as u32);
                out.extend_from_slice(escaped.as_bytes());
            },
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            },
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: &Value) -> String {
        String::from_utf8(to_canonical_bytes(v)).unwrap()
    }

    #[test]
    fn keys_are_sorted() {
        let a = json!({"b": 1, "a": 2, "c": {"z": 0, "y": 1}});
        assert_eq!(canon(&a), r#"{"a":2,"b":1,"c":{"y":1,"z":0}}"#);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [true, null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [true, null], "x": 1}"#).unwrap();
        assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&b));
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canon(&v), "[3,1,2]");
    }

    #[test]
    fn string_escaping_is_minimal() {
        let v = json!({"s": "a\"b\\c\nd\u{01}é"});
        assert_eq!(canon(&v), "{\"s\":\"a\\\"b\\\\c\\nd\\u0001é\"}");
    }

    #[test]
    fn numbers_shortest_form() {
        let v = json!({"i": 42, "f": 1.5, "neg": -0.25, "big": 1e21});
        assert_eq!(canon(&v), r#"{"big":1e21,"f":1.5,"i":42,"neg":-0.25}"#);
    }

    #[test]
    fn null_and_bools() {
        assert_eq!(canon(&Value::Null), "null");
        assert_eq!(canon(&json!(true)), "true");
        assert_eq!(canon(&json!(false)), "false");
    }

    #[test]
    fn nan_is_unrepresentable() {
        #[derive(Serialize)]
        struct Bad {
            x: f64,
        }
        let err = canonicalize(&Bad { x: f64::NAN }).unwrap_err();
        assert!(matches!(err, CanonicalError::Unrepresentable(_)));
    }

    #[test]
    fn canonicalize_matches_value_path() {
        #[derive(Serialize)]
        struct Rec {
            b: u32,
            a: &'static str,
        }
        let bytes = canonicalize(&Rec { b: 7, a: "hi" }).unwrap();
        assert_eq!(bytes, br#"{"a":"hi","b":7}"#.to_vec());
    }
}
