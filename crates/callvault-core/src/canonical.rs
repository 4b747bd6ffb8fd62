//! Deterministic JSON serialization and versioned digests.
//!
//! Evidence hashes must be reproducible bit-for-bit by any party, so the
//! digest is computed over a canonical serialization rather than whatever
//! byte order a JSON library happens to emit. The canonical form follows
//! RFC 8785 (JCS): object keys sorted in byte order, no whitespace, minimal
//! string escaping, arrays in their given order (array order is semantically
//! meaningful for provenance chains; callers comparing unordered sets must
//! pre-sort before hashing).
//!
//! Digest strings carry a fixed `"sha256:"` prefix so the algorithm can be
//! versioned later without ambiguity.
//!
//! # Example
//!
//! ```
//! use callvault_core::canonical::{canonicalize, digest};
//! use serde_json::json;
//!
//! let a = json!({"z": 1, "a": 2});
//! let b = json!({"a": 2, "z": 1});
//! assert_eq!(canonicalize(&a), r#"{"a":2,"z":1}"#);
//! assert_eq!(digest(&a), digest(&b));
//! assert!(digest(&a).starts_with("sha256:"));
//! ```

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix identifying the digest algorithm in sealed hash strings.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Maximum nesting depth accepted by [`validate_value`].
pub const MAX_DEPTH: usize = 128;

/// Errors reported by [`validate_value`].
///
/// Canonicalization itself is total over well-formed [`Value`]s; validation
/// is a separate, opt-in gate used by sealing paths that accept documents
/// from outside the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalJsonError {
    /// The document is nested deeper than [`MAX_DEPTH`] levels.
    #[error("max depth exceeded: JSON nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The depth limit that was exceeded.
        max_depth: usize,
    },
}

/// Produces the canonical serialization of a JSON value.
///
/// Structurally equal values canonicalize identically regardless of object
/// key insertion order. Never fails on a well-formed [`Value`].
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut output = String::new();
    emit_value(value, &mut output);
    output
}

/// Computes the versioned digest of a JSON value.
///
/// Returns `"sha256:" + lowercase-hex(SHA-256(canonical bytes))`. Pure and
/// deterministic: `digest(v) == digest(v)` across calls and across key
/// reordering of `v`.
#[must_use]
pub fn digest(value: &Value) -> String {
    let canonical = canonicalize(value);
    let hash = Sha256::digest(canonical.as_bytes());
    format!("{DIGEST_PREFIX}{}", hex::encode(hash))
}

/// Checks whether a serialized JSON string is already in canonical form.
#[must_use]
pub fn is_canonical(input: &str) -> bool {
    serde_json::from_str::<Value>(input).is_ok_and(|value| canonicalize(&value) == input)
}

/// Validates that a document stays within the nesting depth bound.
///
/// Sealing paths call this before embedding a hash, so a pathologically
/// deep payload is rejected at the boundary instead of recursing without
/// limit later.
///
/// # Errors
///
/// Returns [`CanonicalJsonError::MaxDepthExceeded`] if the document nests
/// deeper than [`MAX_DEPTH`] levels.
pub fn validate_value(value: &Value) -> Result<(), CanonicalJsonError> {
    validate_depth(value, 0)
}

fn validate_depth(value: &Value, depth: usize) -> Result<(), CanonicalJsonError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalJsonError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
        Value::Array(items) => {
            for item in items {
                validate_depth(item, depth + 1)?;
            }
            Ok(())
        },
        Value::Object(fields) => {
            for field in fields.values() {
                validate_depth(field, depth + 1)?;
            }
            Ok(())
        },
    }
}

/// Emits a JSON value in canonical form.
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

/// Emits a number in canonical form.
///
/// Integers are emitted in plain decimal. Non-integer numbers fall back to
/// `serde_json`'s shortest-round-trip formatting, keeping the function total
/// (stored evidence payloads are integer-only in practice).
fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        output.push_str(&n.to_string());
    }
}

/// Emits a string with minimal escaping per RFC 8785 Section 3.2.2.2.
///
/// Only `"`, `\`, and the C0 controls U+0000..U+001F are escaped; short
/// escapes are used where JSON defines them.
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
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

/// Emits an array in canonical form, preserving element order.
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

/// Emits an object with keys sorted in byte order.
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
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_canonicalize_sorts_keys() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonicalize(&value), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_canonicalize_nested_object() {
        let value = json!({"outer": {"z": 1, "a": 2}});
        assert_eq!(canonicalize(&value), r#"{"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_arrays_preserve_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonicalize(&value), "[3,1,2]");
    }

    #[test]
    fn test_canonicalize_primitives() {
        assert_eq!(canonicalize(&json!(null)), "null");
        assert_eq!(canonicalize(&json!(true)), "true");
        assert_eq!(canonicalize(&json!(false)), "false");
        assert_eq!(canonicalize(&json!(42)), "42");
        assert_eq!(canonicalize(&json!(-7)), "-7");
        assert_eq!(canonicalize(&json!("hello")), r#""hello""#);
    }

    #[test]
    fn test_escape_special_chars() {
        let value = json!({"text": "line1\nline2\ttab"});
        assert_eq!(canonicalize(&value), r#"{"text":"line1\nline2\ttab"}"#);
    }

    #[test]
    fn test_escape_quotes_and_backslash() {
        let value = json!({"text": "say \"hi\" with \\"});
        assert_eq!(canonicalize(&value), r#"{"text":"say \"hi\" with \\"}"#);
    }

    #[test]
    fn test_escape_control_chars() {
        let value = json!({"text": "\u{0000}"});
        assert!(canonicalize(&value).contains("\\u0000"));
    }

    #[test]
    fn test_del_not_escaped() {
        // U+007F is outside the mandatory escape range per RFC 8785.
        let value = json!({"text": "\u{007F}"});
        let out = canonicalize(&value);
        assert!(out.contains('\u{007F}'));
        assert!(!out.contains("\\u007f"));
    }

    #[test]
    fn test_digest_prefix_and_stability() {
        let value = json!({"a": 1});
        let d1 = digest(&value);
        let d2 = digest(&value);
        assert_eq!(d1, d2);
        assert!(d1.starts_with(DIGEST_PREFIX));
        // sha256: + 64 hex chars
        assert_eq!(d1.len(), DIGEST_PREFIX.len() + 64);
    }

    #[test]
    fn test_digest_key_order_independence() {
        let a = json!({"c": 3, "a": 1, "b": [1, 2, {"y": 1, "x": 2}]});
        let b = json!({"a": 1, "b": [1, 2, {"x": 2, "y": 1}], "c": 3});
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn test_digest_sensitive_to_array_order() {
        assert_ne!(digest(&json!([1, 2])), digest(&json!([2, 1])));
    }

    #[test]
    fn test_is_canonical() {
        assert!(is_canonical(r#"{"a":1,"b":2}"#));
        assert!(!is_canonical(r#"{"b":2,"a":1}"#));
        assert!(!is_canonical(r#"{ "a": 1 }"#));
    }

    #[test]
    fn test_validate_depth_at_limit() {
        let mut value = json!(0);
        for _ in 0..MAX_DEPTH {
            value = json!({ "n": value });
        }
        assert!(validate_value(&value).is_ok());
    }

    #[test]
    fn test_validate_depth_exceeded() {
        let mut value = json!(0);
        for _ in 0..=MAX_DEPTH {
            value = json!([value]);
        }
        assert_eq!(
            validate_value(&value),
            Err(CanonicalJsonError::MaxDepthExceeded {
                max_depth: MAX_DEPTH
            })
        );
    }

    #[test]
    fn test_canonical_form_idempotent() {
        let inputs = [
            json!({"z": 1, "a": 2}),
            json!({"nested": {"b": 2, "a": 1}, "top": "value"}),
            json!([1, 2, {"y": 3, "x": 4}]),
        ];
        for input in &inputs {
            let once = canonicalize(input);
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            assert_eq!(canonicalize(&reparsed), once);
        }
    }

    /// Strategy over JSON values with string keys and integer leaves.
    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|i| json!(i)),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_digest_survives_reserialization(value in arb_json(4)) {
            let canonical = canonicalize(&value);
            let reparsed: Value = serde_json::from_str(&canonical).unwrap();
            prop_assert_eq!(digest(&value), digest(&reparsed));
        }

        #[test]
        fn prop_canonical_output_parses(value in arb_json(4)) {
            let canonical = canonicalize(&value);
            prop_assert!(serde_json::from_str::<Value>(&canonical).is_ok());
            prop_assert!(is_canonical(&canonical));
        }
    }
}
