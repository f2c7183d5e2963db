//! JSON message codec.
//!
//! Decoding never fails hard: a malformed payload yields `Value::Null` with
//! `ok == false` so a single bad client message cannot take anything down.

use serde_json::Value;

/// Result of [`decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Parsed value, `Null` on failure or empty input.
    pub value: Value,
    /// Whether the input was well-formed.
    pub ok: bool,
    /// Parser message when `ok` is false.
    pub error: Option<String>,
}

/// Parse `bytes` as JSON.
///
/// Empty or whitespace-only input is treated as "no content": `Null`, `ok`.
pub fn decode(bytes: &[u8]) -> Decoded {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Decoded {
            value: Value::Null,
            ok: true,
            error: None,
        };
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Decoded {
            value,
            ok: true,
            error: None,
        },
        Err(e) => Decoded {
            value: Value::Null,
            ok: false,
            error: Some(e.to_string()),
        },
    }
}

/// Serialize `value` as compact JSON.
pub fn encode(value: &Value) -> String {
    // Display on Value is infallible: it cannot hit non-string map keys or
    // failing Serialize impls.
    value.to_string()
}
