// src/structq/ops.rs
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

use super::value::FieldValue;
use crate::decimal::Dec;
use crate::error::ChargingError;
use crate::utils::consts::{META_ANY, META_USERS};
use crate::utils::time::{parse_duration_with_secs, parse_time};
use crate::utils::RsrFilter;

/// Operators taking an array argument; any other array value opens a logical group.
pub const ARRAY_OPERATORS: &[&str] = &["$has", "$in", "$btw", "$repl", "$crepl", "$usrpl", "$rpl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Empty,
    Gt,
    Gte,
    Lt,
    Lte,
    Btw,
    Exp,
    Has,
    In,
    Re,
    Sw,
    Ew,
    Rsr,
    Set,
    Rpl,
    Repl,
    Crepl,
    Usr,
    Usrpl,
}

impl Operator {
    pub fn parse(name: &str) -> Result<Self, ChargingError> {
        Ok(match name {
            "$eq" => Operator::Eq,
            "$empty" => Operator::Empty,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$btw" => Operator::Btw,
            "$exp" => Operator::Exp,
            "$has" => Operator::Has,
            "$in" => Operator::In,
            "$re" => Operator::Re,
            "$sw" => Operator::Sw,
            "$ew" => Operator::Ew,
            "$rsr" => Operator::Rsr,
            "$set" => Operator::Set,
            "$rpl" => Operator::Rpl,
            "$repl" => Operator::Repl,
            "$crepl" => Operator::Crepl,
            "$usr" => Operator::Usr,
            "$usrpl" => Operator::Usrpl,
            other => return Err(ChargingError::Unsupported(other.to_string())),
        })
    }

    /// Unconditional writers never narrow a query.
    pub fn is_unconditional_writer(&self) -> bool {
        matches!(self, Operator::Set | Operator::Repl)
    }
}

/// Result of evaluating a node: a verdict, or a value to be written into the field.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Bool(bool),
    Write(FieldValue),
}

/// Operator argument, pre-validated and pre-compiled at parse time.
#[derive(Debug, Clone)]
pub enum Arg {
    Raw(Value),
    Flag(bool),
    Pair(Value, Value),
    Strings(Vec<String>),
    Values(Vec<Value>),
    Text(String),
    Pattern(Regex),
    Filter(RsrFilter),
    Rewrite(Regex, String),
    Replace(String, String),
}

fn invalid(v: impl std::fmt::Display) -> ChargingError {
    ChargingError::InvalidArgument(v.to_string())
}

pub fn compile_arg(op: Operator, value: &Value) -> Result<Arg, ChargingError> {
    let pair = |v: &Value| -> Result<(Value, Value), ChargingError> {
        match v.as_array() {
            Some(a) if a.len() == 2 => Ok((a[0].clone(), a[1].clone())),
            _ => Err(invalid(v)),
        }
    };
    let str_pair = |v: &Value| -> Result<(String, String), ChargingError> {
        let (a, b) = pair(v)?;
        match (a.as_str(), b.as_str()) {
            (Some(a), Some(b)) => Ok((a.to_string(), b.to_string())),
            _ => Err(invalid(v)),
        }
    };
    let compile = |re: &str| Regex::new(re).map_err(|e| invalid(e));

    Ok(match op {
        Operator::Empty | Operator::Exp => Arg::Flag(value.as_bool().ok_or_else(|| invalid(value))?),
        Operator::Btw => {
            let (lo, hi) = pair(value)?;
            Arg::Pair(lo, hi)
        }
        Operator::Has => {
            let items = value.as_array().ok_or_else(|| invalid(value))?;
            let strings = items
                .iter()
                .map(|i| i.as_str().map(str::to_string).ok_or_else(|| invalid(i)))
                .collect::<Result<Vec<_>, _>>()?;
            Arg::Strings(strings)
        }
        Operator::In => Arg::Values(value.as_array().ok_or_else(|| invalid(value))?.clone()),
        Operator::Re => Arg::Pattern(compile(value.as_str().ok_or_else(|| invalid(value))?)?),
        Operator::Sw | Operator::Ew => Arg::Text(value.as_str().ok_or_else(|| invalid(value))?.to_string()),
        Operator::Rsr => Arg::Filter(RsrFilter::parse(value.as_str().ok_or_else(|| invalid(value))?)?),
        Operator::Rpl => {
            let (search, repl) = str_pair(value)?;
            Arg::Replace(search, repl)
        }
        Operator::Repl | Operator::Crepl => {
            let (search, template) = str_pair(value)?;
            Arg::Rewrite(compile(&search)?, template)
        }
        Operator::Usrpl => {
            let (search, template) = str_pair(value)?;
            let pattern = if search.is_empty() {
                r"\*users|^$".to_string()
            } else {
                format!(r"\*users|^$|{}", search)
            };
            Arg::Rewrite(compile(&pattern)?, template)
        }
        Operator::Eq | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte | Operator::Set | Operator::Usr => {
            Arg::Raw(value.clone())
        }
    })
}

fn dec_arg(v: &Value) -> Result<Dec, ChargingError> {
    match v {
        Value::String(s) => s.parse(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Dec::from_i64(i)),
            None => Dec::from_f64(n.as_f64().unwrap_or_default()),
        },
        other => Err(invalid(other)),
    }
}

fn number_arg(v: &Value) -> Result<f64, ChargingError> {
    v.as_f64().ok_or_else(|| invalid(v))
}

/// Value equality with the argument interpreted in the field's type.
pub fn equals(field: &FieldValue, arg: &Value) -> Result<bool, ChargingError> {
    Ok(match field {
        FieldValue::Null => arg.is_null(),
        FieldValue::Bool(b) => arg.as_bool() == Some(*b),
        FieldValue::Int(i) => arg.as_f64() == Some(*i as f64),
        FieldValue::Float(f) => arg.as_f64() == Some(*f),
        FieldValue::Str(s) => arg.as_str() == Some(s.as_str()),
        FieldValue::Dec(d) => match dec_arg(arg) {
            Ok(x) => *d == x,
            Err(_) => false,
        },
        FieldValue::Duration(_) | FieldValue::Time(_) => compare(field, arg)? == Ordering::Equal,
        FieldValue::List(items) => match arg.as_array() {
            Some(other) if other.len() == items.len() => {
                for (a, b) in items.iter().zip(other) {
                    if !equals(a, b)? {
                        return Ok(false);
                    }
                }
                true
            }
            _ => false,
        },
        FieldValue::Map(_) => false,
    })
}

/// Ordered comparison of the field against the argument parsed in the field's type.
pub fn compare(field: &FieldValue, arg: &Value) -> Result<Ordering, ChargingError> {
    let ord = match field {
        FieldValue::Int(i) => (*i as f64).partial_cmp(&number_arg(arg)?),
        FieldValue::Float(f) => f.partial_cmp(&number_arg(arg)?),
        FieldValue::Dec(d) => Some(d.cmp(&dec_arg(arg)?)),
        FieldValue::Duration(d) => {
            let other = match arg {
                Value::String(s) => parse_duration_with_secs(s)?,
                Value::Number(_) => parse_duration_with_secs(&arg.to_string())?,
                other => return Err(invalid(other)),
            };
            Some(d.cmp(&other))
        }
        FieldValue::Time(t) => {
            let s = arg.as_str().ok_or_else(|| invalid(arg))?;
            let other = parse_time(s, "UTC")?;
            Some(t.cmp(&other))
        }
        other => return Err(invalid(other.type_name())),
    };
    ord.ok_or_else(|| invalid(arg))
}

fn is_empty(field: &FieldValue) -> bool {
    match field {
        FieldValue::Null => true,
        FieldValue::Str(s) => s.trim().is_empty(),
        FieldValue::List(l) => l.is_empty(),
        FieldValue::Map(m) => m.is_empty(),
        FieldValue::Int(i) => *i == 0,
        FieldValue::Float(f) => *f == 0.0,
        FieldValue::Dec(d) => d.is_zero(),
        FieldValue::Bool(_) | FieldValue::Duration(_) | FieldValue::Time(_) => false,
    }
}

fn field_str<'a>(field: &'a FieldValue) -> Result<&'a str, ChargingError> {
    field.as_str().ok_or_else(|| invalid(field))
}

fn expand(re: &Regex, template: &str, value: &str) -> Option<String> {
    re.captures(value).map(|caps| {
        let mut out = String::new();
        caps.expand(template, &mut out);
        out
    })
}

fn string_members(field: &FieldValue) -> Result<Vec<String>, ChargingError> {
    match field {
        FieldValue::List(items) => Ok(items.iter().map(|i| i.to_string()).collect()),
        FieldValue::Map(m) => Ok(m.keys().cloned().collect()),
        other => Err(invalid(other.type_name())),
    }
}

/// Applies one operator to a field value.
pub fn apply(op: Operator, arg: &Arg, field: &FieldValue) -> Result<Outcome, ChargingError> {
    let verdict = |b: bool| Ok(Outcome::Bool(b));
    match (op, arg) {
        (Operator::Eq, Arg::Raw(v)) => verdict(equals(field, v)?),
        (Operator::Empty, Arg::Flag(want)) => match field {
            FieldValue::Bool(_) | FieldValue::Duration(_) | FieldValue::Time(_) => verdict(false),
            _ => verdict(is_empty(field) == *want),
        },
        (Operator::Gt, Arg::Raw(v)) => verdict(compare(field, v)? == Ordering::Greater),
        (Operator::Gte, Arg::Raw(v)) => verdict(compare(field, v)? != Ordering::Less),
        (Operator::Lt, Arg::Raw(v)) => verdict(compare(field, v)? == Ordering::Less),
        (Operator::Lte, Arg::Raw(v)) => verdict(compare(field, v)? != Ordering::Greater),
        (Operator::Btw, Arg::Pair(lo, hi)) => {
            verdict(compare(field, lo)? != Ordering::Less && compare(field, hi)? == Ordering::Less)
        }
        (Operator::Exp, Arg::Flag(expired)) => match field {
            FieldValue::Time(t) => {
                let now = Utc::now();
                let past = matches!(t, Some(t) if *t < now);
                if *expired {
                    verdict(past)
                } else {
                    verdict(t.is_none() || matches!(t, Some(t) if *t > now))
                }
            }
            other => Err(invalid(other.type_name())),
        },
        (Operator::Has, Arg::Strings(wanted)) => {
            let members = string_members(field)?;
            verdict(wanted.iter().all(|w| members.contains(w)))
        }
        (Operator::In, Arg::Values(set)) => match field {
            FieldValue::List(_) | FieldValue::Map(_) => {
                let members = string_members(field)?;
                verdict(members.iter().all(|m| set.iter().any(|s| s.as_str() == Some(m.as_str()))))
            }
            scalar => {
                for candidate in set {
                    if equals(scalar, candidate)? {
                        return verdict(true);
                    }
                }
                verdict(false)
            }
        },
        (Operator::Re, Arg::Pattern(re)) => verdict(re.is_match(field_str(field)?)),
        (Operator::Sw, Arg::Text(p)) => verdict(field_str(field)?.starts_with(p.as_str())),
        (Operator::Ew, Arg::Text(s)) => verdict(field_str(field)?.ends_with(s.as_str())),
        (Operator::Rsr, Arg::Filter(f)) => verdict(f.pass(&field.to_string())),
        (Operator::Set, Arg::Raw(v)) => Ok(Outcome::Write(FieldValue::from_json(v))),
        (Operator::Rpl, Arg::Replace(search, repl)) => {
            let current = field_str(field)?;
            if search != META_ANY && !search.is_empty() && current != search {
                return verdict(false);
            }
            Ok(Outcome::Write(FieldValue::Str(repl.clone())))
        }
        (Operator::Repl, Arg::Rewrite(re, template)) => {
            let current = field_str(field)?;
            let out = expand(re, template, current).unwrap_or_else(|| current.to_string());
            Ok(Outcome::Write(FieldValue::Str(out)))
        }
        (Operator::Crepl, Arg::Rewrite(re, template)) | (Operator::Usrpl, Arg::Rewrite(re, template)) => {
            match expand(re, template, field_str(field)?) {
                Some(out) => Ok(Outcome::Write(FieldValue::Str(out))),
                None => verdict(false),
            }
        }
        (Operator::Usr, Arg::Raw(v)) => {
            let passes = match field {
                FieldValue::Str(s) => s == META_USERS || s.is_empty() || v.as_str() == Some(s.as_str()),
                FieldValue::Null => true,
                other => equals(other, v)?,
            };
            if !passes {
                return verdict(false);
            }
            Ok(Outcome::Write(FieldValue::from_json(v)))
        }
        (op, _) => Err(ChargingError::InvalidArgument(format!("{:?}", op))),
    }
}
