// src/structq/mod.rs
//! Query and rewrite language over records, encoded as JSON.
//!
//! ```text
//! {"Weight": {"$gt": 50}}
//! {"$or": [{"Value": {"$eq": 0}}, {"Value": {"$gte": 100}}]}
//! {"Value": 3, "Weight": 10}                 implicit $and and $eq
//! {"Destination": {"$repl": ["^0(\\d+)", "+49${1}"]}}
//! ```
//!
//! A query is parsed once into a tree. `query` evaluates it without side
//! effects; `change` lets the writer operators update the record.

pub mod ops;
pub mod value;

use serde_json::{Map, Value};

use crate::error::ChargingError;
use ops::{apply, compile_arg, equals, Arg, Operator, Outcome, ARRAY_OPERATORS};
pub use value::{FieldValue, Record};
use value::{assign, lookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone)]
enum Node {
    True,
    Logic(Logic, Vec<Node>),
    /// Descends into a field; the child is evaluated against the field value.
    Key(String, Box<Node>),
    /// Shorthand equality, or assignment in change mode.
    KeyValue(String, Value),
    Op(Operator, Arg),
}

enum Subject<'a> {
    Ref(&'a dyn Record),
    Mut(&'a mut dyn Record),
    Value(FieldValue),
}

impl Node {
    fn complexity(&self) -> usize {
        match self {
            Node::True => 0,
            Node::Logic(_, children) => children.iter().map(Node::complexity).sum(),
            Node::Key(_, child) => child.complexity(),
            Node::KeyValue(..) => 1,
            Node::Op(op, _) => usize::from(!op.is_unconditional_writer()),
        }
    }

    fn check(&self, subject: &mut Subject<'_>, change: bool) -> Result<Outcome, ChargingError> {
        match self {
            Node::True => Ok(Outcome::Bool(true)),
            Node::Logic(logic, children) => {
                let mut accumulator = true;
                for child in children {
                    let Outcome::Bool(c) = child.check(subject, change)? else {
                        continue;
                    };
                    match logic {
                        Logic::Or if c => return Ok(Outcome::Bool(true)),
                        Logic::And if !c => return Ok(Outcome::Bool(false)),
                        _ => accumulator = accumulator && c,
                    }
                }
                Ok(Outcome::Bool(match logic {
                    Logic::Or => false,
                    Logic::And => accumulator,
                    Logic::Not => !accumulator,
                }))
            }
            Node::Op(op, arg) => match subject {
                Subject::Value(field) => {
                    if !change && op.is_unconditional_writer() {
                        return Ok(Outcome::Bool(true));
                    }
                    apply(*op, arg, field)
                }
                _ => Err(ChargingError::InvalidArgument(format!(
                    "operator {:?} needs a field",
                    op
                ))),
            },
            Node::Key(..) | Node::KeyValue(..) => match subject {
                Subject::Ref(rec) => self.check_key_read(*rec),
                Subject::Mut(rec) if !change => self.check_key_read(&**rec),
                Subject::Mut(rec) => self.check_key_write(&mut **rec),
                Subject::Value(FieldValue::Map(m)) if !change => self.check_key_read(&*m),
                Subject::Value(FieldValue::Map(m)) => self.check_key_write(m),
                Subject::Value(other) => Err(ChargingError::InvalidArgument(format!(
                    "{} is not a structure",
                    other.type_name()
                ))),
            },
        }
    }

    fn check_key_read(&self, rec: &dyn Record) -> Result<Outcome, ChargingError> {
        match self {
            Node::KeyValue(key, value) => match lookup(rec, key) {
                Some(field) => Ok(Outcome::Bool(equals(&field, value)?)),
                None => Ok(Outcome::Bool(false)),
            },
            Node::Key(key, child) => {
                let Some(field) = lookup(rec, key) else {
                    return Ok(Outcome::Bool(false));
                };
                let outcome = child.check(&mut Subject::Value(field), false)?;
                Ok(Outcome::Bool(match outcome {
                    Outcome::Bool(b) => b,
                    Outcome::Write(_) => true,
                }))
            }
            _ => Ok(Outcome::Bool(false)),
        }
    }

    fn check_key_write(&self, rec: &mut dyn Record) -> Result<Outcome, ChargingError> {
        match self {
            Node::KeyValue(key, value) => {
                if lookup(&*rec, key).is_none() {
                    return Ok(Outcome::Bool(false));
                }
                assign(rec, key, FieldValue::from_json(value))?;
                Ok(Outcome::Bool(true))
            }
            Node::Key(key, child) => {
                let Some(field) = lookup(&*rec, key) else {
                    return Ok(Outcome::Bool(false));
                };
                let original = field.clone();
                let mut sub = Subject::Value(field);
                match child.check(&mut sub, true)? {
                    Outcome::Bool(b) => {
                        // nested structures are written back when touched
                        if let Subject::Value(updated) = sub {
                            if updated != original {
                                assign(rec, key, updated)?;
                            }
                        }
                        Ok(Outcome::Bool(b))
                    }
                    Outcome::Write(v) => {
                        assign(rec, key, v)?;
                        Ok(Outcome::Bool(true))
                    }
                }
            }
            _ => Ok(Outcome::Bool(false)),
        }
    }
}

fn load(obj: &Map<String, Value>) -> Result<Node, ChargingError> {
    let mut nodes = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        let node = match value {
            Value::Array(_) if ARRAY_OPERATORS.contains(&key.as_str()) => {
                let op = Operator::parse(key)?;
                Node::Op(op, compile_arg(op, value)?)
            }
            Value::Array(items) => {
                let logic = match key.as_str() {
                    "$and" => Logic::And,
                    "$or" => Logic::Or,
                    "$not" => Logic::Not,
                    k if k.starts_with('$') => return Err(ChargingError::Unsupported(k.to_string())),
                    k => {
                        return Err(ChargingError::ParserError(format!(
                            "unexpected list for field {}",
                            k
                        )))
                    }
                };
                let children = items
                    .iter()
                    .map(|item| match item.as_object() {
                        Some(o) => load(o),
                        None => Err(ChargingError::ParserError(format!(
                            "{} expects objects, got {}",
                            key, item
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Node::Logic(logic, children)
            }
            Value::Object(sub) => match key.as_str() {
                "$not" => Node::Logic(Logic::Not, vec![load(sub)?]),
                k if k.starts_with('$') => return Err(ChargingError::Unsupported(k.to_string())),
                k => Node::Key(k.to_string(), Box::new(load(sub)?)),
            },
            scalar => {
                if key.starts_with('$') {
                    let op = Operator::parse(key)?;
                    Node::Op(op, compile_arg(op, scalar)?)
                } else {
                    Node::KeyValue(key.clone(), scalar.clone())
                }
            }
        };
        nodes.push(node);
    }
    Ok(match nodes.len() {
        0 => Node::True,
        1 => nodes.remove(0),
        _ => Node::Logic(Logic::And, nodes),
    })
}

/// A parsed query with its complexity (number of narrowing leaves).
#[derive(Debug, Clone)]
pub struct StructQ {
    source: String,
    root: Node,
    complexity: usize,
}

impl StructQ {
    pub fn new(query: &str) -> Result<Self, ChargingError> {
        let root = if query.trim().is_empty() {
            Node::True
        } else {
            let parsed: Value = serde_json::from_str(query)
                .map_err(|e| ChargingError::ParserError(e.to_string()))?;
            match parsed.as_object() {
                Some(obj) => load(obj)?,
                None => {
                    return Err(ChargingError::ParserError(format!(
                        "query must be an object: {}",
                        query
                    )))
                }
            }
        };
        let complexity = root.complexity();
        Ok(StructQ {
            source: query.to_string(),
            root,
            complexity,
        })
    }

    pub fn complexity(&self) -> usize {
        self.complexity
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates without writing.
    pub fn query(&self, record: &dyn Record) -> Result<bool, ChargingError> {
        verdict(self.root.check(&mut Subject::Ref(record), false)?)
    }

    /// Evaluates letting writer operators update the record.
    pub fn change(&self, record: &mut dyn Record) -> Result<bool, ChargingError> {
        verdict(self.root.check(&mut Subject::Mut(record), true)?)
    }
}

fn verdict(outcome: Outcome) -> Result<bool, ChargingError> {
    match outcome {
        Outcome::Bool(b) => Ok(b),
        Outcome::Write(v) => Err(ChargingError::InvalidArgument(v.to_string())),
    }
}

/// Sorts queries cheapest first.
pub fn sort_by_complexity(queries: &mut [StructQ]) {
    queries.sort_by_key(StructQ::complexity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Dec;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    #[derive(Debug, Default, Clone)]
    struct Balance {
        uuid: String,
        value: Dec,
        weight: f64,
        disabled: bool,
        directions: Vec<String>,
        expiration: Option<chrono::DateTime<Utc>>,
        usage: Duration,
        extra_fields: HashMap<String, String>,
    }

    impl Record for Balance {
        fn get_field(&self, name: &str) -> Option<FieldValue> {
            Some(match name {
                "Uuid" => FieldValue::Str(self.uuid.clone()),
                "Value" => FieldValue::Dec(self.value),
                "Weight" => FieldValue::Float(self.weight),
                "Disabled" => FieldValue::Bool(self.disabled),
                "Directions" => FieldValue::string_set(&self.directions),
                "ExpirationDate" => FieldValue::Time(self.expiration),
                "Usage" => FieldValue::Duration(self.usage),
                _ => return None,
            })
        }

        fn set_field(&mut self, name: &str, v: FieldValue) -> Result<bool, ChargingError> {
            match name {
                "Uuid" => self.uuid = value::expect_string(name, v)?,
                "Value" => self.value = value::expect_dec(name, v)?,
                "Weight" => self.weight = value::expect_f64(name, v)?,
                "Disabled" => self.disabled = value::expect_bool(name, v)?,
                _ => return Ok(false),
            }
            Ok(true)
        }

        fn extra_fields(&self) -> Option<&HashMap<String, String>> {
            Some(&self.extra_fields)
        }

        fn extra_fields_mut(&mut self) -> Option<&mut HashMap<String, String>> {
            Some(&mut self.extra_fields)
        }
    }

    fn balance() -> Balance {
        Balance {
            uuid: "b1".to_string(),
            value: Dec::new(105, 1),
            weight: 20.0,
            disabled: false,
            directions: vec!["*out".to_string(), "*in".to_string()],
            expiration: None,
            usage: Duration::seconds(30),
            extra_fields: HashMap::from([("Extra1".to_string(), "x".to_string())]),
        }
    }

    #[test]
    fn test_empty_query_matches() {
        let q = StructQ::new("").unwrap();
        assert!(q.query(&balance()).unwrap());
        assert_eq!(q.complexity(), 0);
    }

    #[test]
    fn test_implicit_and_with_decimal() {
        let q = StructQ::new(r#"{"Value": 10.5, "Weight": 20}"#).unwrap();
        assert!(q.query(&balance()).unwrap());
        assert_eq!(q.complexity(), 2);
        let q = StructQ::new(r#"{"Value": "10.50", "Weight": 21}"#).unwrap();
        assert!(!q.query(&balance()).unwrap());
    }

    #[test]
    fn test_ordered_operators() {
        let b = balance();
        assert!(StructQ::new(r#"{"Weight": {"$gt": 10}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Weight": {"$lte": 20}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Value": {"$gte": "10.5"}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Usage": {"$lt": "1m"}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Weight": {"$btw": [20, 30]}}"#).unwrap().query(&b).unwrap());
        assert!(!StructQ::new(r#"{"Weight": {"$btw": [10, 20]}}"#).unwrap().query(&b).unwrap());
    }

    #[test]
    fn test_logic_operators() {
        let b = balance();
        let q = StructQ::new(r#"{"$or": [{"Weight": {"$eq": 0}}, {"Weight": {"$gte": 20}}]}"#).unwrap();
        assert!(q.query(&b).unwrap());
        let q = StructQ::new(r#"{"$not": [{"Weight": 20}]}"#).unwrap();
        assert!(!q.query(&b).unwrap());
        let q = StructQ::new(r#"{"$and": [{"Uuid": "b1"}, {"Disabled": false}]}"#).unwrap();
        assert!(q.query(&b).unwrap());
    }

    #[test]
    fn test_empty_and_exp() {
        let mut b = balance();
        assert!(StructQ::new(r#"{"Uuid": {"$empty": false}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"ExpirationDate": {"$exp": false}}"#).unwrap().query(&b).unwrap());
        b.expiration = Some(Utc::now() - Duration::hours(1));
        assert!(StructQ::new(r#"{"ExpirationDate": {"$exp": true}}"#).unwrap().query(&b).unwrap());
    }

    #[test]
    fn test_has_and_in() {
        let b = balance();
        assert!(StructQ::new(r#"{"Directions": {"$has": ["*out"]}}"#).unwrap().query(&b).unwrap());
        assert!(!StructQ::new(r#"{"Directions": {"$has": ["*sms"]}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Directions": {"$in": ["*out", "*in", "*x"]}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Uuid": {"$in": ["b0", "b1"]}}"#).unwrap().query(&b).unwrap());
    }

    #[test]
    fn test_string_operators() {
        let b = balance();
        assert!(StructQ::new(r#"{"Uuid": {"$sw": "b"}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Uuid": {"$ew": "1"}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Uuid": {"$re": "^b\\d$"}}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Uuid": {"$rsr": "^b"}}"#).unwrap().query(&b).unwrap());
    }

    #[test]
    fn test_extra_fields_are_searched_and_written() {
        let mut b = balance();
        assert!(StructQ::new(r#"{"Extra1": "x"}"#).unwrap().query(&b).unwrap());
        assert!(StructQ::new(r#"{"Extra1": {"$set": "y"}}"#).unwrap().change(&mut b).unwrap());
        assert_eq!(b.extra_fields["Extra1"], "y");
    }

    #[test]
    fn test_set_in_query_mode_does_not_write() {
        let mut b = balance();
        let q = StructQ::new(r#"{"Uuid": {"$set": "b2"}}"#).unwrap();
        assert_eq!(q.complexity(), 0);
        assert!(q.query(&b).unwrap());
        assert_eq!(b.uuid, "b1");
        assert!(q.change(&mut b).unwrap());
        assert_eq!(b.uuid, "b2");
    }

    #[test]
    fn test_key_value_assigns_in_change_mode() {
        let mut b = balance();
        assert!(StructQ::new(r#"{"Weight": 5}"#).unwrap().change(&mut b).unwrap());
        assert_eq!(b.weight, 5.0);
        assert!(StructQ::new(r#"{"Value": "1.25"}"#).unwrap().change(&mut b).unwrap());
        assert_eq!(b.value, Dec::new(125, 2));
    }

    #[test]
    fn test_rewrite_operators() {
        let mut b = balance();
        let q = StructQ::new(r#"{"Uuid": {"$repl": ["^b(\\d)", "balance${1}"]}}"#).unwrap();
        assert!(q.change(&mut b).unwrap());
        assert_eq!(b.uuid, "balance1");

        let q = StructQ::new(r#"{"Uuid": {"$crepl": ["^x(\\d)", "${1}"]}}"#).unwrap();
        assert!(!q.change(&mut b).unwrap());
        assert_eq!(b.uuid, "balance1");

        let q = StructQ::new(r#"{"Uuid": {"$rpl": ["balance1", "b9"]}}"#).unwrap();
        assert!(q.change(&mut b).unwrap());
        assert_eq!(b.uuid, "b9");

        let q = StructQ::new(r#"{"Uuid": {"$rpl": ["nope", "b0"]}}"#).unwrap();
        assert!(!q.change(&mut b).unwrap());
    }

    #[test]
    fn test_users_operators() {
        let mut b = balance();
        b.uuid = "*users".to_string();
        assert!(StructQ::new(r#"{"Uuid": {"$usr": "1001"}}"#).unwrap().change(&mut b).unwrap());
        assert_eq!(b.uuid, "1001");
        assert!(!StructQ::new(r#"{"Uuid": {"$usr": "1002"}}"#).unwrap().change(&mut b).unwrap());

        b.uuid = String::new();
        let q = StructQ::new(r#"{"Uuid": {"$usrpl": ["^10", "2001"]}}"#).unwrap();
        assert!(q.change(&mut b).unwrap());
        assert_eq!(b.uuid, "2001");
    }

    #[test]
    fn test_nested_map_struct() {
        let mut rec = std::collections::BTreeMap::new();
        let mut inner = std::collections::BTreeMap::new();
        inner.insert("Id".to_string(), FieldValue::Str("a".into()));
        rec.insert("Balance".to_string(), FieldValue::Map(inner));
        let q = StructQ::new(r#"{"Balance": {"Id": "a"}}"#).unwrap();
        assert!(q.query(&rec).unwrap());
        let q = StructQ::new(r#"{"Balance": {"Id": {"$set": "b"}}}"#).unwrap();
        assert!(q.change(&mut rec).unwrap());
        match rec.get("Balance") {
            Some(FieldValue::Map(m)) => assert_eq!(m.get("Id"), Some(&FieldValue::Str("b".into()))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_errors() {
        assert!(matches!(StructQ::new("{bad"), Err(ChargingError::ParserError(_))));
        assert!(matches!(
            StructQ::new(r#"{"Uuid": {"$nope": 1}}"#),
            Err(ChargingError::Unsupported(_))
        ));
        let q = StructQ::new(r#"{"Weight": {"$sw": "x"}}"#).unwrap();
        assert!(matches!(q.query(&balance()), Err(ChargingError::InvalidArgument(_))));
        assert!(matches!(
            StructQ::new(r#"{"Uuid": {"$empty": "yes"}}"#),
            Err(ChargingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_missing_field_is_false() {
        let q = StructQ::new(r#"{"Nope": "x"}"#).unwrap();
        assert!(!q.query(&balance()).unwrap());
    }

    #[test]
    fn test_sort_by_complexity() {
        let mut qs = vec![
            StructQ::new(r#"{"A": 1, "B": 2}"#).unwrap(),
            StructQ::new(r#"{"A": {"$set": 1}}"#).unwrap(),
        ];
        sort_by_complexity(&mut qs);
        assert_eq!(qs[0].complexity(), 0);
    }
}
