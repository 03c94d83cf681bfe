// src/sessions/event.rs
//! Generic session event: the string keyed map every adapter projects onto.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::engine::{CallDescriptor, Cdr};
use crate::error::ChargingError;
use crate::utils::consts::*;
use crate::utils::time::{parse_duration_with_secs, parse_time};

/// Values filled in when an event leaves a field blank.
#[derive(Debug, Clone)]
pub struct EventDefaults {
    pub tenant: String,
    pub category: String,
    pub request_type: String,
    pub timezone: String,
}

impl Default for EventDefaults {
    fn default() -> Self {
        Self {
            tenant: "cgrates.org".to_string(),
            category: "call".to_string(),
            request_type: META_PREPAID.to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Keys consumed by the session manager itself, never copied into extra fields.
const CONTROL_FIELDS: &[&str] = &[
    EVENT_NAME,
    LAST_USED,
    INITIAL_ORIGIN_ID,
    ORIGIN_ID_PREFIX,
    SESSION_TTL,
    SESSION_TTL_LAST_USED,
    SESSION_TTL_USAGE,
    CGR_FLAGS,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenericEvent(pub HashMap<String, Value>);

impl GenericEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Field rendered as text; numbers keep their JSON form, missing is empty.
    pub fn field_as_string(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn non_empty_or(&self, key: &str, default: &str) -> String {
        let v = self.field_as_string(key);
        if v.is_empty() {
            default.to_string()
        } else {
            v
        }
    }

    pub fn name(&self) -> String {
        self.field_as_string(EVENT_NAME)
    }

    pub fn origin_id(&self) -> String {
        self.field_as_string(ACCID)
    }

    pub fn tor(&self) -> String {
        self.non_empty_or(TOR, VOICE)
    }

    pub fn direction(&self) -> String {
        self.non_empty_or(DIRECTION, META_OUT)
    }

    pub fn tenant(&self, defaults: &EventDefaults) -> String {
        self.non_empty_or(TENANT, &defaults.tenant)
    }

    pub fn category(&self, defaults: &EventDefaults) -> String {
        self.non_empty_or(CATEGORY, &defaults.category)
    }

    pub fn request_type(&self, defaults: &EventDefaults) -> String {
        self.non_empty_or(REQTYPE, &defaults.request_type)
    }

    pub fn account(&self) -> String {
        self.field_as_string(ACCOUNT)
    }

    /// Subject falls back to the account.
    pub fn subject(&self) -> String {
        let account = self.account();
        self.non_empty_or(SUBJECT, &account)
    }

    pub fn destination(&self) -> String {
        self.field_as_string(DESTINATION)
    }

    pub fn supplier(&self) -> String {
        self.field_as_string(SUPPLIER)
    }

    pub fn disconnect_cause(&self) -> String {
        self.field_as_string(DISCONNECT_CAUSE)
    }

    pub fn origin_host(&self) -> String {
        self.field_as_string(CDRHOST)
    }

    pub fn cdr_source(&self) -> String {
        self.non_empty_or(CDRSOURCE, "SMG")
    }

    pub fn initial_origin_id(&self) -> String {
        self.field_as_string(INITIAL_ORIGIN_ID)
    }

    pub fn origin_id_prefix(&self) -> Option<String> {
        self.0.get(ORIGIN_ID_PREFIX).map(|_| self.field_as_string(ORIGIN_ID_PREFIX))
    }

    pub fn setup_time(&self, tz: &str) -> Result<Option<DateTime<Utc>>, ChargingError> {
        parse_time(&self.field_as_string(SETUP_TIME), tz)
    }

    pub fn answer_time(&self, tz: &str) -> Result<Option<DateTime<Utc>>, ChargingError> {
        parse_time(&self.field_as_string(ANSWER_TIME), tz)
    }

    fn duration_field(&self, key: &str) -> Result<Option<Duration>, ChargingError> {
        if !self.has(key) {
            return Ok(None);
        }
        let raw = self.field_as_string(key);
        if raw.is_empty() {
            return Ok(None);
        }
        parse_duration_with_secs(&raw).map(Some)
    }

    pub fn usage(&self) -> Result<Option<Duration>, ChargingError> {
        self.duration_field(USAGE)
    }

    /// Requested usage, falling back to `cfg_max` and capped by it.
    pub fn max_usage(&self, cfg_max: Duration) -> Result<Duration, ChargingError> {
        match self.usage()? {
            Some(u) if cfg_max > Duration::zero() && u > cfg_max => Ok(cfg_max),
            Some(u) => Ok(u),
            None => Ok(cfg_max),
        }
    }

    pub fn last_used(&self) -> Result<Option<Duration>, ChargingError> {
        self.duration_field(LAST_USED)
    }

    pub fn pdd(&self) -> Result<Duration, ChargingError> {
        Ok(self.duration_field(PDD)?.unwrap_or_else(Duration::zero))
    }

    pub fn session_ttl(&self) -> Result<Option<Duration>, ChargingError> {
        self.duration_field(SESSION_TTL)
    }

    pub fn session_ttl_last_used(&self) -> Result<Option<Duration>, ChargingError> {
        self.duration_field(SESSION_TTL_LAST_USED)
    }

    pub fn session_ttl_usage(&self) -> Result<Option<Duration>, ChargingError> {
        self.duration_field(SESSION_TTL_USAGE)
    }

    /// Hash of the origin id and the setup time in UTC.
    pub fn unique_id(&self, tz: &str) -> String {
        let setup = self.setup_time(tz).ok().flatten();
        crate::engine::cdr::cgrid(&self.origin_id(), setup)
    }

    /// Fields outside the CDR's primary set, rendered as text.
    pub fn extra_fields(&self) -> HashMap<String, String> {
        self.0
            .keys()
            .filter(|k| {
                !PRIMARY_CDR_FIELDS.contains(&k.as_str()) && !CONTROL_FIELDS.contains(&k.as_str())
            })
            .map(|k| (k.clone(), self.field_as_string(k)))
            .collect()
    }

    pub fn as_cdr(&self, defaults: &EventDefaults) -> Cdr {
        let tz = defaults.timezone.as_str();
        let mut cdr = Cdr {
            tor: self.tor(),
            origin_id: self.origin_id(),
            origin_host: self.origin_host(),
            source: self.cdr_source(),
            request_type: self.request_type(defaults),
            direction: self.direction(),
            tenant: self.tenant(defaults),
            category: self.category(defaults),
            account: self.account(),
            subject: self.subject(),
            destination: self.destination(),
            setup_time: self.setup_time(tz).ok().flatten(),
            answer_time: self.answer_time(tz).ok().flatten(),
            usage: self.usage().ok().flatten().unwrap_or_else(Duration::zero),
            pdd: self.pdd().unwrap_or_else(|_| Duration::zero()),
            supplier: self.supplier(),
            disconnect_cause: self.disconnect_cause(),
            extra_fields: self.extra_fields(),
            ..Default::default()
        };
        cdr.compute_cgrid();
        cdr
    }

    /// Descriptor used for LCR lookups; usage defaults to one minute.
    pub fn as_lcr_descriptor(&self, defaults: &EventDefaults) -> Result<CallDescriptor, ChargingError> {
        let tz = defaults.timezone.as_str();
        let start = match self.answer_time(tz)? {
            Some(t) => t,
            None => self.setup_time(tz)?.unwrap_or_else(Utc::now),
        };
        let usage = self
            .usage()?
            .filter(|u| *u > Duration::zero())
            .unwrap_or_else(|| Duration::minutes(1));
        Ok(CallDescriptor {
            direction: self.direction(),
            tenant: self.tenant(defaults),
            category: self.category(defaults),
            account: self.account(),
            subject: self.subject(),
            destination: self.destination(),
            tor: self.tor(),
            time_start: start,
            time_end: start + usage,
            duration_index: usage,
            ..Default::default()
        })
    }
}

impl From<HashMap<String, Value>> for GenericEvent {
    fn from(m: HashMap<String, Value>) -> Self {
        GenericEvent(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> GenericEvent {
        serde_json::from_value(json!({
            "EventName": "TEST_EVENT",
            "ToR": "*voice",
            "OriginID": "12345",
            "Account": "account1",
            "Destination": "+4986517174963",
            "Category": "call",
            "Tenant": "cgrates.org",
            "RequestType": "*prepaid",
            "SetupTime": "2015-11-09 14:21:24",
            "AnswerTime": "2015-11-09 14:22:02",
            "Usage": "1m23s",
            "LastUsed": "21s",
            "PDD": "300ms",
            "Supplier": "supplier1",
            "DisconnectCause": "NORMAL_DISCONNECT",
            "OriginHost": "127.0.0.1",
            "Extra1": "Value1",
            "Extra2": 5,
            "SessionTTL": "10s"
        }))
        .unwrap()
    }

    #[test]
    fn test_accessors() {
        let ev = event();
        let d = EventDefaults::default();
        assert_eq!(ev.name(), "TEST_EVENT");
        assert_eq!(ev.origin_id(), "12345");
        assert_eq!(ev.subject(), "account1");
        assert_eq!(ev.direction(), META_OUT);
        assert_eq!(ev.tenant(&d), "cgrates.org");
        assert_eq!(ev.usage().unwrap(), Some(Duration::seconds(83)));
        assert_eq!(ev.last_used().unwrap(), Some(Duration::seconds(21)));
        assert_eq!(ev.pdd().unwrap(), Duration::milliseconds(300));
        assert_eq!(ev.session_ttl().unwrap(), Some(Duration::seconds(10)));
        assert!(ev.session_ttl_usage().unwrap().is_none());
        assert!(ev.answer_time("UTC").unwrap().is_some());
    }

    #[test]
    fn test_max_usage_capped() {
        let ev = event();
        assert_eq!(ev.max_usage(Duration::hours(3)).unwrap(), Duration::seconds(83));
        assert_eq!(ev.max_usage(Duration::seconds(30)).unwrap(), Duration::seconds(30));
        let empty = GenericEvent::new();
        assert_eq!(empty.max_usage(Duration::hours(3)).unwrap(), Duration::hours(3));
    }

    #[test]
    fn test_extra_fields_exclude_primary_and_control() {
        let extra = event().extra_fields();
        assert_eq!(extra.len(), 2);
        assert_eq!(extra["Extra1"], "Value1");
        assert_eq!(extra["Extra2"], "5");
    }

    #[test]
    fn test_as_cdr() {
        let cdr = event().as_cdr(&EventDefaults::default());
        assert_eq!(cdr.origin_id, "12345");
        assert_eq!(cdr.usage, Duration::seconds(83));
        assert_eq!(cdr.supplier, "supplier1");
        assert_eq!(cdr.cgr_id, event().unique_id("UTC"));
        assert_eq!(cdr.cgr_id.len(), 64);
    }

    #[test]
    fn test_unique_id_depends_on_timezone() {
        let ev = event();
        assert_ne!(ev.unique_id("UTC"), ev.unique_id("Europe/Berlin"));
    }

    #[test]
    fn test_lcr_descriptor() {
        let cd = event().as_lcr_descriptor(&EventDefaults::default()).unwrap();
        assert_eq!(cd.duration(), Duration::seconds(83));
        assert_eq!(cd.subject, "account1");
    }
}
