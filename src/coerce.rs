//! Best-effort conversion of extracted strings into typed values
//!
//! Coercion never fails: anything that is not a boolean, a number or a
//! delimited list comes back as a trimmed string.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Numeric value, integer when the text had no fractional part
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// Value stored in a report
///
/// Serialized untagged, so every serializer sees a plain bool, number,
/// string array or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Number(Number),
    List(Vec<String>),
    String(String),
}

impl TypedValue {
    /// Wrap an array result (from `::all`) without coercing its elements
    pub fn from_list(items: Vec<String>) -> Self {
        TypedValue::List(items)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for TypedValue {
    fn from(n: i64) -> Self {
        TypedValue::Number(Number::Int(n))
    }
}

impl From<f64> for TypedValue {
    fn from(n: f64) -> Self {
        TypedValue::Number(Number::Float(n))
    }
}

/// Infer the type of a raw string and convert it.
///
/// Tried in order: boolean, integer, float, list, string.
pub fn coerce(raw: &str) -> TypedValue {
    let value = raw.trim();

    if let Some(b) = parse_bool(value) {
        return TypedValue::Bool(b);
    }

    if let Some(n) = parse_number(value) {
        return TypedValue::Number(n);
    }

    if let Some(list) = split_list(value) {
        return list;
    }

    TypedValue::String(value.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_number(value: &str) -> Option<Number> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(Number::Int(n));
    }

    // f64 parsing also accepts "inf" and "NaN", which no report format can hold
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Number::Float)
}

/// Split on the first delimiter present.
///
/// Only two or more non-empty parts make a list; anything else is left to
/// the string fallback untouched.
fn split_list(value: &str) -> Option<TypedValue> {
    if is_grouped_number(value) {
        return None;
    }

    let sep = [',', ';'].into_iter().find(|sep| value.contains(*sep))?;

    let parts: Vec<String> = value
        .split(sep)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect();

    (parts.len() > 1).then_some(TypedValue::List(parts))
}

/// "1,234" or "-12,345.67": commas are digit grouping, not delimiters
fn is_grouped_number(value: &str) -> bool {
    static GROUPED: OnceLock<Option<Regex>> = OnceLock::new();
    GROUPED
        .get_or_init(|| Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}
