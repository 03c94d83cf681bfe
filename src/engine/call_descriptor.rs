// src/engine/call_descriptor.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Dec;
use crate::engine::call_cost::{Increment, TriggerIds};
use crate::utils::time::duration_ns;

/// Rating request for one slice of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDescriptor {
    #[serde(rename = "Direction", default)]
    pub direction: String,

    #[serde(rename = "Category", default)]
    pub category: String,

    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "Subject", default)]
    pub subject: String,

    #[serde(rename = "Account", default)]
    pub account: String,

    #[serde(rename = "Destination", default)]
    pub destination: String,

    #[serde(rename = "TOR", default)]
    pub tor: String,

    #[serde(rename = "TimeStart")]
    pub time_start: DateTime<Utc>,

    #[serde(rename = "TimeEnd")]
    pub time_end: DateTime<Utc>,

    #[serde(rename = "LoopIndex", default)]
    pub loop_index: i64,

    /// Call duration so far, this slice included.
    #[serde(rename = "DurationIndex", with = "duration_ns")]
    pub duration_index: Duration,

    #[serde(rename = "MaxRate", default)]
    pub max_rate: Dec,

    #[serde(rename = "MaxRateUnit", with = "duration_ns")]
    pub max_rate_unit: Duration,

    #[serde(rename = "MaxCostSoFar", default)]
    pub max_cost_so_far: Dec,

    #[serde(rename = "Increments", default, skip_serializing_if = "Vec::is_empty")]
    pub increments: Vec<Increment>,

    #[serde(rename = "UniqueID", default)]
    pub unique_id: String,

    #[serde(rename = "RunID", default)]
    pub run_id: String,

    #[serde(rename = "ExeATIDs", default, skip_serializing_if = "TriggerIds::is_empty")]
    pub exe_at_ids: TriggerIds,

    #[serde(rename = "UnexeATIDs", default, skip_serializing_if = "TriggerIds::is_empty")]
    pub unexe_at_ids: TriggerIds,

    #[serde(rename = "PostActionTrigger", default)]
    pub post_action_trigger: bool,

    #[serde(rename = "DryRun", default)]
    pub dry_run: bool,
}

impl Default for CallDescriptor {
    fn default() -> Self {
        Self {
            direction: String::new(),
            category: String::new(),
            tenant: String::new(),
            subject: String::new(),
            account: String::new(),
            destination: String::new(),
            tor: String::new(),
            time_start: DateTime::<Utc>::default(),
            time_end: DateTime::<Utc>::default(),
            loop_index: 0,
            duration_index: Duration::zero(),
            max_rate: Dec::ZERO,
            max_rate_unit: Duration::zero(),
            max_cost_so_far: Dec::ZERO,
            increments: Vec::new(),
            unique_id: String::new(),
            run_id: String::new(),
            exe_at_ids: TriggerIds::new(),
            unexe_at_ids: TriggerIds::new(),
            post_action_trigger: false,
            dry_run: false,
        }
    }
}

impl CallDescriptor {
    pub fn duration(&self) -> Duration {
        self.time_end - self.time_start
    }

    pub fn has_pending_triggers(&self) -> bool {
        !self.exe_at_ids.is_empty() || !self.unexe_at_ids.is_empty()
    }

    /// Rating key the engine looks the subject up under.
    pub fn rating_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.direction, self.tenant, self.category, self.subject
        )
    }
}
