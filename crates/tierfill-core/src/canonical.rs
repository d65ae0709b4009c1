//! Canonical JSON serialization and configuration fingerprints.
//!
//! Two values that are equal as JSON documents must produce the same
//! canonical text regardless of how they were built:
//!
//! - object keys are sorted (byte order), recursively
//! - array order is preserved
//! - `null` object members are dropped
//! - floats with no fractional part are written as integers
//!
//! The output has no insignificant whitespace.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Serialize `value` into canonical JSON text.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

/// SHA-256 of the canonical JSON of `value`, as the first
/// [`FINGERPRINT_LEN`] lowercase hex characters.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let canonical = canonical_json(value)?;
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(FINGERPRINT_LEN);
    Ok(hex)
}

fn write_value(value: &Value, out: &mut String) -> serde_json::Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut String) -> serde_json::Result<()> {
    let mut entries: Vec<(&String, &Value)> = map.iter().filter(|(_, v)| !v.is_null()).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key)?);
        out.push(':');
        write_value(value, out)?;
    }
    out.push('}');
    Ok(())
}

fn write_number(n: &Number, out: &mut String) {
    if let Some(f) = n.as_f64()
        && n.is_f64()
        && f.is_finite()
        && f.fract() == 0.0
        && f.abs() < 9.007_199_254_740_992e15
    {
        out.push_str(&format!("{}", f as i64));
        return;
    }
    out.push_str(&n.to_string());
}
