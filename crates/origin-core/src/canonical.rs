//! Canonical JSON encoding for hashing and signing.
//!
//! Ledger event hashes and certificate signatures are computed over a single
//! deterministic encoding: object keys sorted lexicographically (byte order),
//! no insignificant whitespace, minimal string escaping per RFC 8785, and
//! UTF-8 output. The same encoder serves both the ledger and the certificate
//! service; the emitted bytes are stored verbatim and are the sole hash
//! pre-image.
//!
//! # Constraints
//!
//! - **Deterministic numbers**: integers emit their decimal form; floats emit
//!   the shortest representation that round-trips the underlying bit pattern
//!   (`serde_json`'s ryu formatting). NaN and infinities cannot be
//!   represented in JSON and are rejected upstream by `serde_json`.
//! - **UTF-8 NFC normalized strings**: strings that are not in NFC form are
//!   rejected, so visually identical payloads cannot hash differently.
//! - **Maximum depth**: structures nested deeper than 64 levels are rejected
//!   to bound recursion.

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum nesting depth accepted by the canonicalizer.
pub const MAX_DEPTH: usize = 64;

/// Errors produced while canonicalizing a JSON value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// A string (or object key) is not in Unicode NFC form.
    #[error("non-NFC string at path '{path}'")]
    NonNfcString {
        /// JSON path of the offending string.
        path: String,
    },

    /// The value is nested deeper than [`MAX_DEPTH`] levels.
    #[error("max depth exceeded: nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The limit that was exceeded.
        max_depth: usize,
    },
}

/// Serializes a value through [`serde::Serialize`] and canonicalizes it.
///
/// This is the usual entry point: build the payload as a struct or
/// `serde_json::json!` literal and obtain the canonical bytes in one step.
///
/// # Errors
///
/// Returns [`CanonicalError`] if the resulting JSON violates the NFC or
/// depth constraints.
pub fn to_canonical_json<T: serde::Serialize>(value: &T) -> Result<String, CanonicalError> {
    let value = serde_json::to_value(value).map_err(|_| CanonicalError::MaxDepthExceeded {
        max_depth: MAX_DEPTH,
    })?;
    canonicalize(&value)
}

/// Produces the canonical encoding of an already-parsed JSON value.
///
/// # Errors
///
/// Returns [`CanonicalError`] if the value violates the NFC or depth
/// constraints.
pub fn canonicalize(value: &Value) -> Result<String, CanonicalError> {
    validate_value(value, "", 0)?;
    let mut output = String::new();
    emit_value(value, &mut output);
    Ok(output)
}

/// Returns true if `input` parses as JSON and equals its own canonical form.
#[must_use]
pub fn is_canonical(input: &str) -> bool {
    serde_json::from_str::<Value>(input)
        .ok()
        .and_then(|v| canonicalize(&v).ok())
        .is_some_and(|canonical| canonical == input)
}

fn validate_value(value: &Value, path: &str, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
        Value::String(s) => validate_string(s, path),
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                validate_value(item, &format!("{path}[{i}]"), depth + 1)?;
            }
            Ok(())
        }
        Value::Object(obj) => {
            for (key, val) in obj {
                validate_string(key, &format!("{path}.{key}(key)"))?;
                let val_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                validate_value(val, &val_path, depth + 1)?;
            }
            Ok(())
        }
    }
}

fn validate_string(s: &str, path: &str) -> Result<(), CanonicalError> {
    let nfc: String = s.nfc().collect();
    if nfc != s {
        return Err(CanonicalError::NonNfcString {
            path: path.to_string(),
        });
    }
    Ok(())
}

fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => emit_string(s, output),
        Value::Array(arr) => emit_array(arr, output),
        Value::Object(obj) => emit_object(obj, output),
    }
}

/// Integers emit their decimal form; floats go through `Number::to_string`,
/// which is ryu's shortest round-trip form and therefore stable for a given
/// bit pattern.
fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        output.push_str(&n.to_string());
    }
}

/// Minimal escaping per RFC 8785 Section 3.2.2.2: only `"`, `\`, and control
/// characters below U+0020 are escaped, using the short escapes where
/// defined and `\uXXXX` otherwise.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            }
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(arr: &[Value], output: &mut String) {
    output.push('[');
    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output);
    }
    output.push(']');
}

fn emit_object(obj: &Map<String, Value>, output: &mut String) {
    let mut sorted_keys: Vec<&String> = obj.keys().collect();
    sorted_keys.sort();

    output.push('{');
    for (i, key) in sorted_keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&obj[*key], output);
    }
    output.push('}');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sorts_keys() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonicalize(&value).unwrap(), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let value = json!({"outer": {"z": 1, "a": 2}});
        assert_eq!(canonicalize(&value).unwrap(), r#"{"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({"a": [1, 2, {"b": true}], "c": null});
        assert_eq!(
            canonicalize(&value).unwrap(),
            r#"{"a":[1,2,{"b":true}],"c":null}"#
        );
    }

    #[test]
    fn test_float_shortest_form_is_stable() {
        let value = json!({"risk": 0.35, "assurance": 0.8});
        let first = canonicalize(&value).unwrap();
        let second = canonicalize(&value).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r#"{"assurance":0.8,"risk":0.35}"#);
    }

    #[test]
    fn test_string_escaping_minimal() {
        let value = json!({"s": "line\nbreak \"quoted\" \u{0001}"});
        assert_eq!(
            canonicalize(&value).unwrap(),
            r#"{"s":"line\nbreak \"quoted\" "}"#
        );
    }

    #[test]
    fn test_unicode_passes_through_unescaped() {
        let value = json!({"title": "café ☕"});
        assert_eq!(canonicalize(&value).unwrap(), r#"{"title":"café ☕"}"#);
    }

    #[test]
    fn test_non_nfc_rejected() {
        // "café" with a combining acute accent (NFD) instead of the
        // precomposed character.
        let decomposed = "cafe\u{0301}";
        let value = json!({ "title": decomposed });
        let err = canonicalize(&value).unwrap_err();
        assert!(matches!(err, CanonicalError::NonNfcString { .. }));
    }

    #[test]
    fn test_depth_limit() {
        let mut value = json!(1);
        for _ in 0..(MAX_DEPTH + 2) {
            value = json!([value]);
        }
        let err = canonicalize(&value).unwrap_err();
        assert!(matches!(err, CanonicalError::MaxDepthExceeded { .. }));
    }

    #[test]
    fn test_is_canonical() {
        assert!(is_canonical(r#"{"a":1,"b":2}"#));
        assert!(!is_canonical(r#"{"b":2,"a":1}"#));
        assert!(!is_canonical(r#"{"a": 1}"#));
        assert!(!is_canonical("not json"));
    }

    #[test]
    fn test_serialize_entry_point() {
        #[derive(serde::Serialize)]
        struct Payload {
            upload_id: String,
            decision: &'static str,
        }

        let canonical = to_canonical_json(&Payload {
            upload_id: "up-1".to_string(),
            decision: "ALLOW",
        })
        .unwrap();
        assert_eq!(canonical, r#"{"decision":"ALLOW","upload_id":"up-1"}"#);
    }
}
