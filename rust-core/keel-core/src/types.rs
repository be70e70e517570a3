//! # Parameter Types
//!
//! Raw request strings (path segments, query values) become the typed values
//! an action declared. A route segment may carry its type: `{id:int}`.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Declared type of a path or query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    /// Kept as received
    #[default]
    String,
    /// `i64`
    Int,
    /// `f64`
    Float,
    /// `true`/`false`, `1`/`0` or `yes`/`no`, any case
    Bool,
}

impl ParamType {
    /// Type named after the colon in `{name:type}`; unknown names are `String`
    #[must_use]
    pub fn from_specifier(spec: &str) -> Self {
        const ALIASES: [(&str, ParamType); 7] = [
            ("int", ParamType::Int),
            ("integer", ParamType::Int),
            ("long", ParamType::Int),
            ("float", ParamType::Float),
            ("double", ParamType::Float),
            ("bool", ParamType::Bool),
            ("boolean", ParamType::Bool),
        ];
        ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(spec))
            .map_or(Self::String, |(_, ty)| *ty)
    }

    /// Name used in binding errors
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }

    /// Convert the raw text of parameter `param`
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` naming `param` and this type.
    pub fn convert(self, param: &str, raw: &str) -> Result<ParamValue> {
        let rejected = |why: String| Error::binding(param, self.name(), format!("'{raw}': {why}"));
        Ok(match self {
            Self::String => ParamValue::String(raw.to_owned()),
            Self::Int => ParamValue::Int(raw.parse::<i64>().map_err(|e| rejected(format!("{e}")))?),
            Self::Float => ParamValue::Float(raw.parse::<f64>().map_err(|e| rejected(format!("{e}")))?),
            Self::Bool => {
                ParamValue::Bool(parse_flag(raw).ok_or_else(|| rejected("not a boolean".into()))?)
            }
        })
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let truthy = ["true", "1", "yes"];
    let falsy = ["false", "0", "no"];
    if truthy.iter().any(|t| t.eq_ignore_ascii_case(raw)) {
        Some(true)
    } else if falsy.iter().any(|f| f.eq_ignore_ascii_case(raw)) {
        Some(false)
    } else {
        None
    }
}

/// A bound parameter after conversion
///
/// Serializes as the bare value, so a `String("42")` is `"42"` in JSON and an
/// `Int(42)` is `42`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Text value
    String(String),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Flag value
    Bool(bool),
}

impl ParamValue {
    /// Type this value was converted to
    #[must_use]
    pub const fn param_type(&self) -> ParamType {
        match self {
            Self::String(_) => ParamType::String,
            Self::Int(_) => ParamType::Int,
            Self::Float(_) => ParamType::Float,
            Self::Bool(_) => ParamType::Bool,
        }
    }

    /// Text, if this is a `String`
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(s) = self { Some(s) } else { None }
    }

    /// Integer, if this is an `Int`
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(i) = self { Some(*i) } else { None }
    }

    /// Number, if this is a `Float`
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        if let Self::Float(v) = self { Some(*v) } else { None }
    }

    /// Flag, if this is a `Bool`
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(b) = self { Some(*b) } else { None }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Name and declared type of a route segment
///
/// `:id` and `{id}` declare a string, `{id:int}` an int. Static segments
/// and catch-alls (`*`, `{*rest}`) give `None`.
#[must_use]
pub fn parse_param_pattern(segment: &str) -> Option<(String, ParamType)> {
    let (name, ty) = match segment.strip_prefix(':') {
        Some(name) => (name, ParamType::String),
        None => {
            let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
            if inner.starts_with('*') {
                return None;
            }
            inner
                .split_once(':')
                .map_or((inner, ParamType::String), |(n, spec)| (n, ParamType::from_specifier(spec)))
        }
    };
    Some((name.to_owned(), ty))
}
