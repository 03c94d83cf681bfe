// src/structq/value.rs
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::decimal::Dec;
use crate::error::ChargingError;
use crate::utils::time::format_go_duration;

/// Typed view of a record field as seen by the query engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Dec(Dec),
    Duration(Duration),
    /// `None` is the zero time.
    Time(Option<DateTime<Utc>>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FieldValue::Str(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(FieldValue::from_json).collect()),
            Value::Object(m) => FieldValue::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn string_set(strings: &[String]) -> Self {
        FieldValue::List(strings.iter().cloned().map(FieldValue::Str).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Dec(_) => "decimal",
            FieldValue::Duration(_) => "duration",
            FieldValue::Time(_) => "time",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Dec(d) => write!(f, "{}", d),
            FieldValue::Duration(d) => f.write_str(&format_go_duration(*d)),
            FieldValue::Time(Some(t)) => write!(f, "{}", t.to_rfc3339()),
            FieldValue::Time(None) => Ok(()),
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            FieldValue::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

/// A structure the query engine can read by field name and, in change mode, write.
pub trait Record {
    fn get_field(&self, name: &str) -> Option<FieldValue>;

    /// Writes a primary field. `Ok(false)` means the record has no such field.
    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool, ChargingError>;

    fn extra_fields(&self) -> Option<&HashMap<String, String>> {
        None
    }

    fn extra_fields_mut(&mut self) -> Option<&mut HashMap<String, String>> {
        None
    }
}

impl Record for BTreeMap<String, FieldValue> {
    fn get_field(&self, name: &str) -> Option<FieldValue> {
        self.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool, ChargingError> {
        self.insert(name.to_string(), value);
        Ok(true)
    }
}

pub(crate) fn lookup(rec: &dyn Record, key: &str) -> Option<FieldValue> {
    rec.get_field(key).or_else(|| {
        rec.extra_fields()
            .and_then(|ef| ef.get(key))
            .map(|s| FieldValue::Str(s.clone()))
    })
}

pub(crate) fn assign(rec: &mut dyn Record, key: &str, value: FieldValue) -> Result<(), ChargingError> {
    if rec.set_field(key, value.clone())? {
        return Ok(());
    }
    match rec.extra_fields_mut() {
        Some(ef) if ef.contains_key(key) => match value {
            FieldValue::Str(s) => {
                ef.insert(key.to_string(), s);
                Ok(())
            }
            other => Err(ChargingError::InvalidArgument(format!(
                "cannot set {} to {}",
                key, other
            ))),
        },
        _ => Err(ChargingError::InvalidArgument(format!(
            "cannot set {} to {}",
            key, value
        ))),
    }
}

/// Helpers for `Record::set_field` implementations converting the loosely
/// typed query argument to the field's own type.
pub fn expect_string(key: &str, v: FieldValue) -> Result<String, ChargingError> {
    match v {
        FieldValue::Str(s) => Ok(s),
        FieldValue::Int(i) => Ok(i.to_string()),
        FieldValue::Float(f) => Ok(f.to_string()),
        other => Err(ChargingError::InvalidArgument(format!("cannot set {} to {}", key, other))),
    }
}

pub fn expect_dec(key: &str, v: FieldValue) -> Result<Dec, ChargingError> {
    match v {
        FieldValue::Dec(d) => Ok(d),
        FieldValue::Str(s) => s.parse(),
        FieldValue::Int(i) => Ok(Dec::from_i64(i)),
        FieldValue::Float(f) => Dec::from_f64(f),
        other => Err(ChargingError::InvalidArgument(format!("cannot set {} to {}", key, other))),
    }
}

pub fn expect_bool(key: &str, v: FieldValue) -> Result<bool, ChargingError> {
    match v {
        FieldValue::Bool(b) => Ok(b),
        other => Err(ChargingError::InvalidArgument(format!("cannot set {} to {}", key, other))),
    }
}

pub fn expect_f64(key: &str, v: FieldValue) -> Result<f64, ChargingError> {
    match v {
        FieldValue::Float(f) => Ok(f),
        FieldValue::Int(i) => Ok(i as f64),
        other => Err(ChargingError::InvalidArgument(format!("cannot set {} to {}", key, other))),
    }
}
