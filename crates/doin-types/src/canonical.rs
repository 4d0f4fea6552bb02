//! Canonical JSON serialization.
//!
//! Every hashed artifact in the network is defined against this canonical
//! form so that all nodes derive identical digests:
//!
//! 1. Object keys sorted lexicographically (UTF-8 byte order)
//! 2. Compact representation, no whitespace
//! 3. Whole-valued floats emitted as integers
//! 4. Fields with null values omitted

use crate::id::Digest;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CanonicalError>;

/// Serialize a value to its canonical JSON string.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json_value = serde_json::to_value(value)?;
    let canonical = canonicalize_value(json_value);
    Ok(serde_json::to_string(&canonical)?)
}

/// Deterministic digest of a value's canonical JSON representation.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<Digest> {
    let canonical_json = to_canonical_json(value)?;
    Ok(Digest::hash(canonical_json.as_bytes()))
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                if !v.is_null() {
                    sorted.insert(k, canonicalize_value(v));
                }
            }
            let mut canonical_map = Map::new();
            for (k, v) in sorted {
                canonical_map.insert(k, v);
            }
            Value::Object(canonical_map)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize_value).collect()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < (1u64 << 53) as f64 {
                    Value::Number(serde_json::Number::from(f as i64))
                } else {
                    Value::Number(serde_json::Number::from_f64(f).unwrap_or(n))
                }
            } else {
                Value::Number(n)
            }
        }
        other => other,
    }
}
