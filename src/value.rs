//! Constant values carried by terms and produced by expressions.
//!
//! Values in mendlog cover the primitives rules compare against (numbers,
//! strings, booleans, time spans) plus an opaque structured payload for
//! host data that rules only pass around.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A constant value.
///
/// # Examples
///
/// ```
/// use mendlog::Value;
///
/// let int_val = Value::Int(3);
/// let span = Value::parse_literal("00:30:00");
///
/// assert!(int_val.is_int());
/// assert!(span.is_duration());
/// assert_eq!(span.as_duration().map(|d| d.as_secs()), Some(1800));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text.
    String(String),
    /// A time span, written `hh:mm:ss` in rules.
    Duration(Duration),
    /// An opaque JSON payload supplied by the host.
    Structured(serde_json::Value),
    /// No value.
    Null,
}

impl Value {
    /// Returns true for [`Value::Bool`].
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Returns true for [`Value::Int`].
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Returns true for [`Value::Float`].
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// Returns true for integers and floats.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Returns true for [`Value::String`].
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Returns true for [`Value::Duration`].
    pub const fn is_duration(&self) -> bool {
        matches!(self, Self::Duration(_))
    }

    /// Returns true for [`Value::Structured`].
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Returns true for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a float; integers are promoted.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The string contents, if this is a string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The duration, if this is one.
    pub const fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(v) => Some(*v),
            _ => None,
        }
    }

    /// The JSON payload, if this is one.
    pub const fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Duration(_) => "duration",
            Self::Structured(_) => "structured",
            Self::Null => "null",
        }
    }

    /// Interprets the value as a time span.
    ///
    /// Strings in `[d.]hh:mm:ss[.fff]` form and whole numbers of seconds
    /// are accepted alongside real durations.
    #[must_use]
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            Self::String(s) => parse_timespan(s),
            Self::Int(secs) => u64::try_from(*secs).ok().map(Duration::from_secs),
            _ => None,
        }
    }

    /// Interprets the value as a boolean, accepting `"true"`/`"false"` strings.
    #[must_use]
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Self::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Renders the value without quoting, as used by string concatenation.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::String(v) => v.clone(),
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Parses an unquoted literal token.
    ///
    /// Recognises `true`, `false`, `null`, integers, floats and time spans;
    /// anything else is kept as a string.
    #[must_use]
    pub fn parse_literal(token: &str) -> Self {
        match token {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            "null" => return Self::Null,
            _ => {}
        }
        if let Ok(v) = token.parse::<i64>() {
            return Self::Int(v);
        }
        if looks_numeric(token) {
            if let Ok(v) = token.parse::<f64>() {
                return Self::Float(v);
            }
        }
        if let Some(d) = parse_timespan(token) {
            return Self::Duration(d);
        }
        Self::String(token.to_string())
    }

    /// Orders two values of compatible types.
    ///
    /// Integers and floats compare numerically with each other; every other
    /// pairing of distinct types is unordered.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Some(a.cmp(b)),
            (Self::Duration(a), Self::String(b)) => parse_timespan(b).map(|b| a.cmp(&b)),
            (Self::String(a), Self::Duration(b)) => parse_timespan(a).map(|a| a.cmp(b)),
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_float()?.partial_cmp(&b.as_float()?)
            }
            _ => None,
        }
    }

    /// Equality used by `==`: numeric values compare by magnitude.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Structured(a), Self::Structured(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

fn looks_numeric(token: &str) -> bool {
    let body = token.strip_prefix('-').unwrap_or(token);
    !body.is_empty()
        && body.chars().next().is_some_and(|c| c.is_ascii_digit())
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

/// Parses a `[d.]hh:mm:ss[.fff]` time span.
#[must_use]
pub fn parse_timespan(text: &str) -> Option<Duration> {
    let text = text.trim();
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (d.parse::<u64>().ok()?, h.parse::<u64>().ok()?),
        None => (0, parts[0].parse::<u64>().ok()?),
    };
    let minutes = parts[1].parse::<u64>().ok()?;
    if hours > 23 || minutes > 59 || parts[1].len() != 2 {
        return None;
    }

    let (secs, nanos) = match parts[2].split_once('.') {
        Some((s, frac)) => {
            if frac.is_empty() || frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let padded = format!("{frac:0<9}");
            (s.parse::<u64>().ok()?, padded.parse::<u32>().ok()?)
        }
        None => (parts[2].parse::<u64>().ok()?, 0),
    };
    if secs > 59 {
        return None;
    }

    let total = days * 86_400 + hours * 3_600 + minutes * 60 + secs;
    Some(Duration::new(total, nanos))
}

/// Formats a duration as `[d.]hh:mm:ss[.fff]`.
#[must_use]
pub fn format_timespan(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;
    let mut out = if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    };
    let millis = d.subsec_millis();
    if millis > 0 {
        out.push_str(&format!(".{millis:03}"));
    }
    out
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Duration(v) => write!(f, "{}", format_timespan(*v)),
            Self::Structured(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}
