// src/sessions/active.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::decimal::Dec;
use crate::utils::consts::*;
use crate::utils::time::{duration_ns, format_go_duration};

/// Read-only projection of a running session, one per derived run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    #[serde(rename = "UniqueID")]
    pub unique_id: String,

    #[serde(rename = "TOR")]
    pub tor: String,

    #[serde(rename = "RunID")]
    pub run_id: String,

    #[serde(rename = "OriginID")]
    pub origin_id: String,

    #[serde(rename = "CdrHost")]
    pub cdr_host: String,

    #[serde(rename = "CdrSource")]
    pub cdr_source: String,

    #[serde(rename = "ReqType")]
    pub req_type: String,

    #[serde(rename = "Direction")]
    pub direction: String,

    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "Category")]
    pub category: String,

    #[serde(rename = "Account")]
    pub account: String,

    #[serde(rename = "Subject")]
    pub subject: String,

    #[serde(rename = "Destination")]
    pub destination: String,

    #[serde(rename = "SetupTime")]
    pub setup_time: Option<DateTime<Utc>>,

    #[serde(rename = "AnswerTime")]
    pub answer_time: Option<DateTime<Utc>>,

    #[serde(rename = "Usage", with = "duration_ns")]
    pub usage: Duration,

    #[serde(rename = "PDD", with = "duration_ns")]
    pub pdd: Duration,

    #[serde(rename = "ExtraFields")]
    pub extra_fields: HashMap<String, String>,

    #[serde(rename = "Supplier")]
    pub supplier: String,

    #[serde(rename = "SMId")]
    pub sm_id: String,

    #[serde(rename = "LoopIndex")]
    pub loop_index: i64,

    #[serde(rename = "DurationIndex", with = "duration_ns")]
    pub duration_index: Duration,

    #[serde(rename = "MaxRate")]
    pub max_rate: Dec,

    #[serde(rename = "MaxRateUnit", with = "duration_ns")]
    pub max_rate_unit: Duration,

    #[serde(rename = "MaxCostSoFar")]
    pub max_cost_so_far: Dec,
}

impl ActiveSession {
    /// Field by event or projection name, extra fields last. `None` when absent.
    pub fn field_as_string(&self, name: &str) -> Option<String> {
        let time = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
        let v = match name {
            "UniqueID" | CGRID => self.unique_id.clone(),
            TOR | "TOR" => self.tor.clone(),
            RUN_ID => self.run_id.clone(),
            ACCID => self.origin_id.clone(),
            CDRHOST | "CdrHost" => self.cdr_host.clone(),
            CDRSOURCE | "CdrSource" => self.cdr_source.clone(),
            REQTYPE | "ReqType" => self.req_type.clone(),
            DIRECTION => self.direction.clone(),
            TENANT => self.tenant.clone(),
            CATEGORY => self.category.clone(),
            ACCOUNT => self.account.clone(),
            SUBJECT => self.subject.clone(),
            DESTINATION => self.destination.clone(),
            SETUP_TIME => time(&self.setup_time),
            ANSWER_TIME => time(&self.answer_time),
            USAGE => format_go_duration(self.usage),
            PDD => format_go_duration(self.pdd),
            SUPPLIER => self.supplier.clone(),
            "SMId" => self.sm_id.clone(),
            "LoopIndex" => self.loop_index.to_string(),
            "DurationIndex" => format_go_duration(self.duration_index),
            "MaxRate" => self.max_rate.to_string(),
            "MaxCostSoFar" => self.max_cost_so_far.to_string(),
            other => return self.extra_fields.get(other).cloned(),
        };
        Some(v)
    }

    /// Value as stored in the session index: blank and missing become literals.
    pub fn indexed_value(&self, name: &str) -> String {
        match self.field_as_string(name) {
            None => NOT_AVAILABLE.to_string(),
            Some(v) if v.is_empty() => META_EMPTY.to_string(),
            Some(v) => v,
        }
    }
}
