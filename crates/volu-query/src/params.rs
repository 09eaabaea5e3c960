//! Typed query parameters.
//!
//! Every bound parameter carries its warehouse type explicitly. Nothing is
//! inferred from the parameter name: a DATE parameter is a
//! [`ParamValue::Date`], whatever it is called.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Named parameters bound to a query, ordered by name.
pub type Params = BTreeMap<String, ParamValue>;

/// Date format accepted for DATE parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Literal that marks a typed NULL on the command line.
pub const NULL_LITERAL: &str = "NULL";

/// Errors from parameter parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("invalid parameter argument '{0}': expected name[:TYPE]=value")]
    InvalidArgument(String),

    #[error("unknown parameter type: {0}")]
    UnknownType(String),

    #[error("parameter '{0}' given more than once")]
    Duplicate(String),

    #[error("invalid {ty} value for parameter '{name}': {value}")]
    InvalidValue {
        name: String,
        ty: ParamType,
        value: String,
    },
}

/// Warehouse type of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Int64,
    Float64,
    Date,
    String,
}

impl ParamType {
    /// Wire name understood by the warehouse.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ParamType::Bool => "BOOL",
            ParamType::Int64 => "INT64",
            ParamType::Float64 => "FLOAT64",
            ParamType::Date => "DATE",
            ParamType::String => "STRING",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ParamType {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Ok(ParamType::Bool),
            "INT64" | "INT" | "INTEGER" => Ok(ParamType::Int64),
            "FLOAT64" | "FLOAT" => Ok(ParamType::Float64),
            "DATE" => Ok(ParamType::Date),
            "STRING" => Ok(ParamType::String),
            _ => Err(ParamError::UnknownType(s.to_string())),
        }
    }
}

/// A bound parameter value tagged with its type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    String(String),
    /// SQL NULL of the given type, e.g. an open date bound.
    Null(ParamType),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Int(_) => ParamType::Int64,
            ParamValue::Float(_) => ParamType::Float64,
            ParamValue::Date(_) => ParamType::Date,
            ParamValue::String(_) => ParamType::String,
            ParamValue::Null(ty) => *ty,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null(_))
    }

    /// A DATE parameter, or a typed NULL when the bound is open.
    pub fn date_or_null(date: Option<NaiveDate>) -> Self {
        date.map(ParamValue::Date)
            .unwrap_or(ParamValue::Null(ParamType::Date))
    }

    /// A STRING parameter, or a typed NULL when absent.
    pub fn string_or_null(value: Option<&str>) -> Self {
        value
            .map(|v| ParamValue::String(v.to_string()))
            .unwrap_or(ParamValue::Null(ParamType::String))
    }

    /// Parse raw text as a value of `ty`.
    pub fn parse_typed(name: &str, ty: ParamType, raw: &str) -> Result<Self, ParamError> {
        let invalid = || ParamError::InvalidValue {
            name: name.to_string(),
            ty,
            value: raw.to_string(),
        };

        match ty {
            ParamType::Bool => match raw.to_lowercase().as_str() {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err(invalid()),
            },
            ParamType::Int64 => raw.parse().map(ParamValue::Int).map_err(|_| invalid()),
            ParamType::Float64 => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(invalid),
            ParamType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(ParamValue::Date)
                .map_err(|_| invalid()),
            ParamType::String => Ok(ParamValue::String(raw.to_string())),
        }
    }

    /// Text form sent to the warehouse; `None` for NULL.
    pub fn wire_value(&self) -> Option<String> {
        match self {
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            ParamValue::String(s) => Some(s.clone()),
            ParamValue::Null(_) => None,
        }
    }
}

/// Serializes as `{"type": <wire type>, "value": <value>}`: dates as
/// `YYYY-MM-DD` strings, nulls as JSON null.
impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tagged = serializer.serialize_struct("ParamValue", 2)?;
        tagged.serialize_field("type", self.param_type().wire_name())?;
        match self {
            ParamValue::Bool(b) => tagged.serialize_field("value", b)?,
            ParamValue::Int(i) => tagged.serialize_field("value", i)?,
            ParamValue::Float(f) => tagged.serialize_field("value", f)?,
            ParamValue::Date(d) => {
                tagged.serialize_field("value", &d.format(DATE_FORMAT).to_string())?
            }
            ParamValue::String(s) => tagged.serialize_field("value", s)?,
            ParamValue::Null(_) => tagged.serialize_field("value", &None::<()>)?,
        }
        tagged.end()
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(d: NaiveDate) -> Self {
        ParamValue::Date(d)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

/// Parse a command-line parameter of the form `name[:TYPE]=value`.
///
/// Without a type the value is a STRING. `NULL` is a typed null only when
/// a type is given; `name=NULL` is the string "NULL".
pub fn parse_param_arg(arg: &str) -> Result<(String, ParamValue), ParamError> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| ParamError::InvalidArgument(arg.to_string()))?;

    let (name, ty) = match key.split_once(':') {
        Some((name, ty)) => (name, Some(ty.parse::<ParamType>()?)),
        None => (key, None),
    };

    if name.is_empty() {
        return Err(ParamError::InvalidArgument(arg.to_string()));
    }

    let value = match ty {
        Some(ty) if raw == NULL_LITERAL => ParamValue::Null(ty),
        Some(ty) => ParamValue::parse_typed(name, ty, raw)?,
        None => ParamValue::String(raw.to_string()),
    };
    Ok((name.to_string(), value))
}

/// Parse repeated `name[:TYPE]=value` arguments into a parameter set.
pub fn parse_param_args<I, S>(args: I) -> Result<Params, ParamError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut params = Params::new();
    for arg in args {
        let (name, value) = parse_param_arg(arg.as_ref())?;
        if params.contains_key(&name) {
            return Err(ParamError::Duplicate(name));
        }
        params.insert(name, value);
    }
    Ok(params)
}
