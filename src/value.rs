//! The [`Value`] data model and deterministic, opt-in coercion from CSV text.
//!
//! A CSV field is always raw text; [`Value`] is what that text becomes once
//! [`ConversionOptions::parse_numbers`](crate::options::ConversionOptions)
//! and/or `parse_booleans` ask for typed coercion. Coercion never guesses —
//! it follows the exact round-trip rule in `parse_number` so that a value
//! which came from a CSV cell and is written back out reproduces the same
//! text (modulo RFC 4180 escaping).

use std::fmt;

use serde_json::{Map, Number};

/// A single coerced CSV cell, or an already-typed JSON scalar on the way
/// back out to CSV.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// An ordered mapping from header name to [`Value`], preserving the column
/// order of the header row it was produced from. Backed by `serde_json`'s
/// `preserve_order` map so it serializes directly as a JSON object without
/// an intermediate copy.
pub type Record = Map<String, serde_json::Value>;

impl Value {
    /// Render the value the way it would appear in a CSV field, before
    /// RFC 4180 escaping is applied.
    pub fn to_field_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float_round_trip(*f),
            Value::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_field_text())
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(Number::from(i)),
            Value::Float(f) => Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
        }
    }
}

impl From<&serde_json::Value> for Value {
    /// Lossily narrows an arbitrary JSON value into the crate's tagged
    /// union, per the jsonToCsv field-escaping rule: objects and arrays
    /// become compact JSON text.
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Value::Text(serde_json::to_string(value).unwrap_or_default())
            }
        }
    }
}

/// Shortest round-trip decimal rendering for a float, matching the codec's
/// "numbers -> shortest round-trip decimal" rule. Integral floats render
/// without a trailing `.0` so `2.0` round-trips as `2`.
pub fn format_float_round_trip(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let mut buf = ryu_like_shortest(value);
        if buf.ends_with(".0") {
            buf.truncate(buf.len() - 2);
        }
        buf
    }
}

fn ryu_like_shortest(value: f64) -> String {
    // `{}` on f64 already produces the shortest string that round-trips in
    // Rust's std formatter (Grisu3-based), so no extra crate is needed here.
    format!("{value}")
}

/// Attempts to parse `trimmed` as a decimal literal that round-trips back
/// to the same text once reformatted, per the coercion rule in the codec:
/// "matches a decimal literal and round-trips to text". Returns `None` for
/// anything ambiguous (leading zeros other than `0`/`0.x`, `+` signs,
/// exponent notation, thousands separators) rather than guessing.
pub fn parse_number(trimmed: &str) -> Option<Value> {
    if trimmed.is_empty() {
        return None;
    }
    let bytes = trimmed.as_bytes();
    let mut idx = 0usize;
    if bytes[idx] == b'-' {
        idx += 1;
    }
    if idx >= bytes.len() {
        return None;
    }
    let digits_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == digits_start {
        return None;
    }
    // Reject leading zeros like "007" (but allow a bare "0").
    let int_len = idx - digits_start;
    if int_len > 1 && bytes[digits_start] == b'0' {
        return None;
    }
    if idx == bytes.len() {
        return trimmed.parse::<i64>().ok().map(Value::Int);
    }
    if bytes[idx] != b'.' {
        return None;
    }
    idx += 1;
    let frac_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx != bytes.len() || idx == frac_start {
        return None;
    }
    let parsed: f64 = trimmed.parse().ok()?;
    if format_float_round_trip(parsed) == trimmed {
        Some(Value::Float(parsed))
    } else {
        None
    }
}

/// Case-insensitive `true`/`false` coercion, per `parseBooleans`.
pub fn parse_boolean(trimmed: &str) -> Option<Value> {
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ => None,
    }
}
