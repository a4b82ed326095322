//! The typed value produced by the codec and carried through the readout.

use std::fmt;

use serde::{Serialize, Serializer};

/// A single coerced reading value.
///
/// This is deliberately a closed set of the four typecast targets the
/// codec and output engine support (`int`, `float`, `str`, `bool`) plus the
/// untyped numeric result the codec produces before an explicit typecast is
/// applied. `null`/missing is never represented here: callers drop it
/// before constructing a `Value`, per the codec's "return null, never a
/// sentinel `Value`" failure model.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.parse::<f64>().ok(),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }

    #[test]
    fn as_bool_parses_common_strings() {
        assert_eq!(Value::Str("yes".into()).as_bool(), Some(true));
        assert_eq!(Value::Str("no".into()).as_bool(), Some(false));
        assert_eq!(Value::Str("maybe".into()).as_bool(), None);
    }

    #[test]
    fn serializes_without_quoting_numerics() {
        let s = serde_json::to_string(&Value::Float(12.5)).unwrap();
        assert_eq!(s, "12.5");
        let s = serde_json::to_string(&Value::Str("running".into())).unwrap();
        assert_eq!(s, "\"running\"");
    }
}
