//! Canonical JSON encoding for signable payloads.
//!
//! Kredo signatures are computed over a canonical byte form inspired by
//! RFC 8785 (JCS), with two additions the protocol's signing contract
//! requires beyond what JCS alone gives you:
//!
//! - object keys whose value is `null` are dropped before sorting, so a
//!   client that omits an optional field and a client that sends it
//!   explicitly as `null` produce the same signable bytes;
//! - every non-ASCII character is escaped as `\uXXXX` (surrogate pairs for
//!   codepoints above the BMP), so the signable form is pure ASCII and
//!   therefore unambiguous across encodings/locales.
//!
//! Otherwise this follows JCS: object keys sorted lexicographically by
//! UTF-16 code unit, no insignificant whitespace, numbers via `serde_json`'s
//! own formatting.

use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("value could not be represented as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("value is not an object at the top level")]
    NotAnObject,
}

/// Produce the canonical signable bytes for a value.
///
/// `value` is serialized to `serde_json::Value` first, then recursively
/// pruned and rewritten. Returns the canonical UTF-8 bytes that are fed
/// directly to Ed25519 sign/verify.
pub fn canonical<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let v = serde_json::to_value(value)?;
    let pruned = prune_nulls(&v);
    let mut out = String::new();
    write_canonical(&pruned, &mut out);
    Ok(out.into_bytes())
}

/// The pruned `serde_json::Value` a signature is computed over — useful for
/// inspecting or re-deriving what exactly a client signed.
pub fn signable_view<T: Serialize>(value: &T) -> Result<serde_json::Value, CodecError> {
    let v = serde_json::to_value(value)?;
    Ok(prune_nulls(&v))
}

/// SHA-256 of a value's canonical bytes, hex-encoded.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(sha256_hex(&canonical(value)?))
}

/// Raw SHA-256 hash (hex-encoded).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Recursively drop object entries whose value is `Value::Null`.
fn prune_nulls(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                out.insert(k.clone(), prune_nulls(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(prune_nulls).collect()),
        other => other.clone(),
    }
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped_string(k, out);
                out.push(':');
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(arr) => {
            out.push('[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        serde_json::Value::String(s) => write_escaped_string(s, out),
        serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
            out.push_str(&value.to_string());
        }
    }
}

/// Write a JSON string literal with every non-ASCII codepoint escaped as
/// `\uXXXX` (surrogate-paired above the BMP), matching quotes/backslashes/
/// control characters the usual JSON way.
fn write_escaped_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if c.is_ascii() => out.push(c),
            c => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon_str(v: &serde_json::Value) -> String {
        let pruned = prune_nulls(v);
        let mut out = String::new();
        write_canonical(&pruned, &mut out);
        out
    }

    #[test]
    fn sorts_keys() {
        assert_eq!(canon_str(&json!({"b": 1, "a": 2})), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn nests() {
        assert_eq!(canon_str(&json!({"z": {"b": 1, "a": 2}, "a": []})), r#"{"a":[],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn drops_null_fields() {
        assert_eq!(canon_str(&json!({"a": 1, "b": null})), r#"{"a":1}"#);
        assert_eq!(canon_str(&json!({"a": [{"x": null, "y": 2}]})), r#"{"a":[{"y":2}]}"#);
    }

    #[test]
    fn escapes_non_ascii() {
        let v = json!({"name": "caf\u{e9}"});
        assert_eq!(canon_str(&v), "{\"name\":\"caf\\u00e9\"}");
    }

    #[test]
    fn escapes_astral_as_surrogate_pair() {
        // U+1F600 GRINNING FACE decomposes into a UTF-16 surrogate pair.
        let v = json!({"e": "\u{1F600}"});
        let c = canon_str(&v);
        assert_eq!(c, "{\"e\":\"\\ud83d\\ude00\"}");
    }

    #[test]
    fn escapes_quotes_and_control_chars() {
        assert_eq!(canon_str(&json!({"msg": "hello \"world\"\n"})), r#"{"msg":"hello \"world\"\n"}"#);
    }

    #[test]
    fn array_order_preserved() {
        assert_eq!(canon_str(&json!([3, 1, 2])), "[3,1,2]");
    }

    #[test]
    fn hash_is_deterministic_and_32_bytes() {
        let v = json!({"kredo": "1.0", "id": "x"});
        let h1 = hash_canonical(&v).unwrap();
        let h2 = hash_canonical(&v).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn signable_view_matches_canonical_bytes() {
        let v = json!({"b": 1, "a": null, "c": [1, null, 2]});
        let view = signable_view(&v).unwrap();
        let bytes = canonical(&v).unwrap();
        let mut expect = String::new();
        write_canonical(&view, &mut expect);
        assert_eq!(bytes, expect.into_bytes());
    }
}
