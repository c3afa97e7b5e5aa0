//! JSON-safety layer.
//!
//! Every value a plugin tool returns passes through [`sanitize`] before it
//! becomes part of a response or a frame result. The output contains only
//! JSON primitives (null, bool, integer, finite number, string), lists
//! thereof, and string-keyed maps.
//!
//! `serde_json::Value` already rules out most of the hazards the original
//! contract guards against (tuples, binary buffers, non-string keys), so the
//! remaining enforcement is: finite numbers only, a nesting-depth cap, and
//! the byte policy — raw bytes travel inside the process, base64 appears
//! only at transport boundaries via [`encode_image_base64`].
//!
//! Idempotent by construction: `sanitize(sanitize(x)) == sanitize(x)`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{ErrorKind, ForgeError};

/// Values nested deeper than this are rejected rather than recursed into.
pub const MAX_DEPTH: usize = 64;

/// Recursively verify and rebuild `value` as a JSON-safe tree.
///
/// Fails with `JSON_UNSAFE` when a number is not finite (possible when a
/// `Value` was produced by a parser in arbitrary-precision mode) or when the
/// nesting depth exceeds [`MAX_DEPTH`].
pub fn sanitize(value: &Value) -> Result<Value, ForgeError> {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Result<Value, ForgeError> {
    if depth > MAX_DEPTH {
        return Err(ForgeError::new(
            ErrorKind::JsonUnsafe,
            format!("value nesting exceeds {} levels", MAX_DEPTH),
        ));
    }
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(value.clone());
            }
            match n.as_f64() {
                Some(f) if f.is_finite() => Ok(value.clone()),
                _ => Err(ForgeError::new(
                    ErrorKind::JsonUnsafe,
                    format!("non-finite number '{}' is not JSON-safe", n),
                )),
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(sanitize_at(item, depth + 1)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), sanitize_at(v, depth + 1)?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Serialize `value` to JSON and sanitize the result.
///
/// This is the single entry point for turning typed tool outputs into
/// response payloads.
pub fn to_json_safe<T: Serialize>(value: &T) -> Result<Value, ForgeError> {
    let raw = serde_json::to_value(value).map_err(|e| {
        ForgeError::new(
            ErrorKind::JsonUnsafe,
            format!("value does not serialize to JSON: {}", e),
        )
    })?;
    sanitize(&raw)
}

/// Build a JSON number from a computed float, refusing NaN/Inf explicitly
/// instead of letting serialization degrade them to null.
pub fn finite_number(x: f64) -> Result<Value, ForgeError> {
    if !x.is_finite() {
        return Err(ForgeError::new(
            ErrorKind::JsonUnsafe,
            "computed value is NaN or infinite",
        ));
    }
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| ForgeError::new(ErrorKind::JsonUnsafe, "float is not representable"))
}

/// Encode image bytes for transport. The only sanctioned producer of base64
/// inside tool outputs: annotated images crossing the JSON boundary.
pub fn encode_image_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode base64 image data arriving at a transport boundary.
pub fn decode_image_base64(text: &str) -> Result<Vec<u8>, ForgeError> {
    BASE64
        .decode(text.trim())
        .map_err(|e| ForgeError::invalid_input(format!("invalid base64 image data: {}", e)))
}
