//! Canonical JSON encoding for hash pre-images
//!
//! Every hash in the chain is taken over the byte string this module
//! produces, and the rules are part of the wire protocol shared with
//! non-Rust implementations:
//!
//! 1. Object keys are sorted lexicographically at every nesting level
//! 2. Arrays keep their order
//! 3. Numbers use their shortest round-trip decimal representation
//! 4. Strings are UTF-8 with standard JSON escaping
//! 5. No whitespace anywhere
//!
//! A one-byte divergence between writer and verifier breaks verification,
//! so the module carries a golden fixture corpus (`self_test`) that both
//! unit tests and the CLI run.

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Canonically encode any serializable value to a `String`.
///
/// Fails with `Error::Serialization` when the value cannot be represented
/// as JSON (e.g. a map with non-string keys).
pub fn canonical_string<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&mut out, &value)?;
    Ok(out)
}

/// Canonically encode any serializable value to bytes.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    canonical_string(value).map(String::into_bytes)
}

/// Wrap a float as a JSON number, rejecting NaN and infinities.
///
/// `serde_json::to_value` silently maps non-finite floats to `null`, which
/// would corrupt a hash pre-image without any signal. Payload builders that
/// accept caller floats go through this guard instead.
pub fn finite_number(value: f64) -> Result<Value> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or(Error::NonFinite)
}

fn write_value(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            // serde_json renders integers via itoa and floats via ryu, which
            // is the shortest round-trip form. Value::Number cannot hold a
            // non-finite float, but guard anyway in case of alternative
            // Number backends.
            if n.as_f64().map(|f| !f.is_finite()).unwrap_or(false) {
                return Err(Error::NonFinite);
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => {
            // Standard JSON escaping (quote, backslash, control characters).
            out.push_str(&serde_json::to_string(s)?);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort keys at every level. serde_json's map is already ordered
            // without the preserve_order feature, but the sort is the
            // protocol rule, not an implementation detail.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_value(out, &map[key])?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// A fixture that failed the golden-byte comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestFailure {
    /// Name of the failing fixture.
    pub fixture: &'static str,
    /// The golden encoding.
    pub expected: String,
    /// What this build produced.
    pub actual: String,
}

impl std::fmt::Display for SelfTestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "canonical fixture '{}' diverged: expected {}, got {}",
            self.fixture, self.expected, self.actual
        )
    }
}

impl std::error::Error for SelfTestFailure {}

/// Encode the fixture corpus and compare against golden bytes.
///
/// Run on demand (`keywitness selftest`) and in unit tests. Any divergence
/// here means this build would produce hashes no other implementation can
/// reproduce.
pub fn self_test() -> std::result::Result<(), SelfTestFailure> {
    for (name, value, golden) in fixtures() {
        let actual = canonical_string(&value).map_err(|e| SelfTestFailure {
            fixture: name,
            expected: golden.to_string(),
            actual: format!("<error: {}>", e),
        })?;
        if actual != golden {
            return Err(SelfTestFailure {
                fixture: name,
                expected: golden.to_string(),
                actual,
            });
        }
    }
    Ok(())
}

fn fixtures() -> Vec<(&'static str, Value, &'static str)> {
    use serde_json::json;

    vec![
        (
            "key-order",
            json!({"b": 1, "a": [2, 3], "c": {"z": null, "y": true}}),
            r#"{"a":[2,3],"b":1,"c":{"y":true,"z":null}}"#,
        ),
        (
            "nested-sort",
            json!({"outer": {"b": 2, "a": 1}, "list": [{"d": 4, "c": 3}]}),
            r#"{"list":[{"c":3,"d":4}],"outer":{"a":1,"b":2}}"#,
        ),
        (
            "string-escaping",
            json!({"quote": "he said \"hi\"", "nl": "a\nb", "back": "x\\y"}),
            r#"{"back":"x\\y","nl":"a\nb","quote":"he said \"hi\""}"#,
        ),
        (
            "unicode-passthrough",
            json!({"k": "héllo ↑"}),
            r#"{"k":"héllo ↑"}"#,
        ),
        (
            "numbers",
            json!([0, -1, 1000000, 3.5, 0.1]),
            "[0,-1,1000000,3.5,0.1]",
        ),
        ("empties", json!({"a": {}, "b": [], "c": ""}), r#"{"a":{},"b":[],"c":""}"#),
        (
            "event-shaped",
            json!({
                "type": "contentChange",
                "sequence": 0,
                "timestamp": 12,
                "inputType": "insertText",
                "data": "h"
            }),
            r#"{"data":"h","inputType":"insertText","sequence":0,"timestamp":12,"type":"contentChange"}"#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorts_keys_at_every_level() {
        let value = json!({"z": {"b": 1, "a": 2}, "a": 0});
        let encoded = canonical_string(&value).unwrap();
        assert_eq!(encoded, r#"{"a":0,"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn test_arrays_preserve_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonical_string(&value).unwrap(), "[3,1,2]");
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({"a": [1, {"b": true}], "c": null});
        let encoded = canonical_string(&value).unwrap();
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains('\n'));
    }

    #[test]
    fn test_bare_string_is_quoted() {
        // Checkpoint contentHash canonicalizes a bare payload value, which
        // for a text edit is a JSON string.
        assert_eq!(canonical_string(&"hello").unwrap(), r#""hello""#);
    }

    #[test]
    fn test_finite_number_rejects_nan_and_infinity() {
        assert!(matches!(finite_number(f64::NAN), Err(Error::NonFinite)));
        assert!(matches!(
            finite_number(f64::INFINITY),
            Err(Error::NonFinite)
        ));
        assert!(matches!(
            finite_number(f64::NEG_INFINITY),
            Err(Error::NonFinite)
        ));
        assert!(finite_number(0.5).is_ok());
    }

    #[test]
    fn test_injective_on_distinct_values() {
        let a = canonical_string(&json!({"a": 1})).unwrap();
        let b = canonical_string(&json!({"a": 2})).unwrap();
        let c = canonical_string(&json!({"a": "1"})).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_self_test_passes() {
        self_test().expect("golden fixtures must encode identically");
    }
}
