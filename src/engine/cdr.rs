// src/engine/cdr.rs
//! Charging records exchanged with the CDR store: the full CDR, the
//! per-run session cost and the store arguments.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::decimal::Dec;
use crate::engine::call_cost::CallCost;
use crate::error::ChargingError;
use crate::structq::value::{expect_bool, expect_dec, expect_string, FieldValue, Record};
use crate::utils::consts::*;
use crate::utils::sha256_hex;
use crate::utils::time::{duration_ns, parse_duration_with_secs, parse_time};

/// Unique id of a call: hash of its origin id and UTC setup time.
pub fn cgrid(origin_id: &str, setup_time: Option<DateTime<Utc>>) -> String {
    let setup = setup_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.f +0000 UTC").to_string())
        .unwrap_or_else(|| "0001-01-01 00:00:00 +0000 UTC".to_string());
    sha256_hex(&[origin_id, &setup])
}

fn unrated() -> Dec {
    Dec::MINUS_ONE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cdr {
    #[serde(rename = "CGRID", default)]
    pub cgr_id: String,

    #[serde(rename = "RunID", default)]
    pub run_id: String,

    #[serde(rename = "OriginHost", default)]
    pub origin_host: String,

    #[serde(rename = "Source", default)]
    pub source: String,

    #[serde(rename = "OriginID", default)]
    pub origin_id: String,

    #[serde(rename = "ToR", default)]
    pub tor: String,

    #[serde(rename = "RequestType", default)]
    pub request_type: String,

    #[serde(rename = "Direction", default)]
    pub direction: String,

    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "Category", default)]
    pub category: String,

    #[serde(rename = "Account", default)]
    pub account: String,

    #[serde(rename = "Subject", default)]
    pub subject: String,

    #[serde(rename = "Destination", default)]
    pub destination: String,

    #[serde(rename = "SetupTime", default)]
    pub setup_time: Option<DateTime<Utc>>,

    #[serde(rename = "PDD", with = "duration_ns", default = "Duration::zero")]
    pub pdd: Duration,

    #[serde(rename = "AnswerTime", default)]
    pub answer_time: Option<DateTime<Utc>>,

    #[serde(rename = "Usage", with = "duration_ns", default = "Duration::zero")]
    pub usage: Duration,

    #[serde(rename = "Supplier", default)]
    pub supplier: String,

    #[serde(rename = "DisconnectCause", default)]
    pub disconnect_cause: String,

    #[serde(rename = "ExtraFields", default)]
    pub extra_fields: HashMap<String, String>,

    #[serde(rename = "CostSource", default)]
    pub cost_source: String,

    #[serde(rename = "Cost", default = "unrated")]
    pub cost: Dec,

    #[serde(rename = "ExtraInfo", default)]
    pub extra_info: String,

    #[serde(rename = "Partial", default)]
    pub partial: bool,

    #[serde(rename = "Rated", default)]
    pub rated: bool,
}

impl Default for Cdr {
    fn default() -> Self {
        Self {
            cgr_id: String::new(),
            run_id: String::new(),
            origin_host: String::new(),
            source: String::new(),
            origin_id: String::new(),
            tor: String::new(),
            request_type: String::new(),
            direction: String::new(),
            tenant: String::new(),
            category: String::new(),
            account: String::new(),
            subject: String::new(),
            destination: String::new(),
            setup_time: None,
            pdd: Duration::zero(),
            answer_time: None,
            usage: Duration::zero(),
            supplier: String::new(),
            disconnect_cause: String::new(),
            extra_fields: HashMap::new(),
            cost_source: String::new(),
            cost: unrated(),
            extra_info: String::new(),
            partial: false,
            rated: false,
        }
    }
}

impl Cdr {
    pub fn compute_cgrid(&mut self) {
        self.cgr_id = cgrid(&self.origin_id, self.setup_time);
    }

    /// Value of a primary or extra field rendered as text.
    pub fn field_as_string(&self, name: &str) -> String {
        match self.get_field(name) {
            Some(FieldValue::Time(None)) | None => self
                .extra_fields
                .get(name)
                .cloned()
                .unwrap_or_default(),
            Some(v) => v.to_string(),
        }
    }

    /// Sets a field out of its textual form, as read from CDR files.
    /// Unknown names land in the extra fields. Appends to string fields.
    pub fn parse_field_value(&mut self, name: &str, value: &str, tz: &str) -> Result<(), ChargingError> {
        match name {
            SETUP_TIME => self.setup_time = parse_time(value, tz)?,
            ANSWER_TIME => self.answer_time = parse_time(value, tz)?,
            USAGE => self.usage = parse_duration_with_secs(value)?,
            PDD => self.pdd = parse_duration_with_secs(value)?,
            COST => self.cost = value.parse()?,
            PARTIAL => self.partial = value.eq_ignore_ascii_case("true"),
            "Rated" => self.rated = value.eq_ignore_ascii_case("true"),
            _ => match self.get_field(name) {
                Some(FieldValue::Str(current)) => {
                    self.set_field(name, FieldValue::Str(current + value))?;
                }
                _ => self
                    .extra_fields
                    .entry(name.to_string())
                    .or_default()
                    .push_str(value),
            },
        }
        Ok(())
    }
}

fn to_time(key: &str, v: FieldValue) -> Result<Option<DateTime<Utc>>, ChargingError> {
    match v {
        FieldValue::Time(t) => Ok(t),
        FieldValue::Str(s) => parse_time(&s, ""),
        other => Err(ChargingError::InvalidArgument(format!(
            "cannot set {} to {}",
            key, other
        ))),
    }
}

fn to_duration(key: &str, v: FieldValue) -> Result<Duration, ChargingError> {
    match v {
        FieldValue::Duration(d) => Ok(d),
        FieldValue::Int(ns) => Ok(Duration::nanoseconds(ns)),
        FieldValue::Str(s) => parse_duration_with_secs(&s),
        other => Err(ChargingError::InvalidArgument(format!(
            "cannot set {} to {}",
            key, other
        ))),
    }
}

impl Record for Cdr {
    fn get_field(&self, name: &str) -> Option<FieldValue> {
        let v = match name {
            CGRID => FieldValue::Str(self.cgr_id.clone()),
            RUN_ID => FieldValue::Str(self.run_id.clone()),
            CDRHOST => FieldValue::Str(self.origin_host.clone()),
            CDRSOURCE => FieldValue::Str(self.source.clone()),
            ACCID => FieldValue::Str(self.origin_id.clone()),
            TOR => FieldValue::Str(self.tor.clone()),
            REQTYPE => FieldValue::Str(self.request_type.clone()),
            DIRECTION => FieldValue::Str(self.direction.clone()),
            TENANT => FieldValue::Str(self.tenant.clone()),
            CATEGORY => FieldValue::Str(self.category.clone()),
            ACCOUNT => FieldValue::Str(self.account.clone()),
            SUBJECT => FieldValue::Str(self.subject.clone()),
            DESTINATION => FieldValue::Str(self.destination.clone()),
            SETUP_TIME => FieldValue::Time(self.setup_time),
            PDD => FieldValue::Duration(self.pdd),
            ANSWER_TIME => FieldValue::Time(self.answer_time),
            USAGE => FieldValue::Duration(self.usage),
            SUPPLIER => FieldValue::Str(self.supplier.clone()),
            DISCONNECT_CAUSE => FieldValue::Str(self.disconnect_cause.clone()),
            "CostSource" => FieldValue::Str(self.cost_source.clone()),
            COST => FieldValue::Dec(self.cost),
            "ExtraInfo" => FieldValue::Str(self.extra_info.clone()),
            PARTIAL => FieldValue::Bool(self.partial),
            "Rated" => FieldValue::Bool(self.rated),
            _ => return None,
        };
        Some(v)
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool, ChargingError> {
        match name {
            CGRID => self.cgr_id = expect_string(name, value)?,
            RUN_ID => self.run_id = expect_string(name, value)?,
            CDRHOST => self.origin_host = expect_string(name, value)?,
            CDRSOURCE => self.source = expect_string(name, value)?,
            ACCID => self.origin_id = expect_string(name, value)?,
            TOR => self.tor = expect_string(name, value)?,
            REQTYPE => self.request_type = expect_string(name, value)?,
            DIRECTION => self.direction = expect_string(name, value)?,
            TENANT => self.tenant = expect_string(name, value)?,
            CATEGORY => self.category = expect_string(name, value)?,
            ACCOUNT => self.account = expect_string(name, value)?,
            SUBJECT => self.subject = expect_string(name, value)?,
            DESTINATION => self.destination = expect_string(name, value)?,
            SETUP_TIME => self.setup_time = to_time(name, value)?,
            PDD => self.pdd = to_duration(name, value)?,
            ANSWER_TIME => self.answer_time = to_time(name, value)?,
            USAGE => self.usage = to_duration(name, value)?,
            SUPPLIER => self.supplier = expect_string(name, value)?,
            DISCONNECT_CAUSE => self.disconnect_cause = expect_string(name, value)?,
            "CostSource" => self.cost_source = expect_string(name, value)?,
            COST => self.cost = expect_dec(name, value)?,
            "ExtraInfo" => self.extra_info = expect_string(name, value)?,
            PARTIAL => self.partial = expect_bool(name, value)?,
            "Rated" => self.rated = expect_bool(name, value)?,
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

/// Cost of one derived run, emitted once at session close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmCost {
    #[serde(rename = "UniqueID")]
    pub unique_id: String,

    #[serde(rename = "CostSource")]
    pub cost_source: String,

    #[serde(rename = "RunID")]
    pub run_id: String,

    #[serde(rename = "OriginHost")]
    pub origin_host: String,

    #[serde(rename = "OriginID")]
    pub origin_id: String,

    /// Seconds.
    #[serde(rename = "Usage")]
    pub usage: f64,

    #[serde(rename = "CostDetails")]
    pub cost_details: CallCost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrStoreSmCost {
    #[serde(rename = "Cost")]
    pub cost: SmCost,

    #[serde(rename = "CheckDuplicate")]
    pub check_duplicate: bool,
}
