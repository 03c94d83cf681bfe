// src/engine/session_run.rs
use serde::{Deserialize, Serialize};

use crate::engine::call_cost::CallCost;
use crate::engine::call_descriptor::CallDescriptor;

/// Derived charger that produced a run; only the run label is consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedCharger {
    #[serde(rename = "RunID", default)]
    pub run_id: String,

    #[serde(rename = "RunFilters", default)]
    pub run_filters: String,
}

/// One rating run of a session as returned by `Responder.GetSessionRuns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRun {
    #[serde(rename = "DerivedCharger", default)]
    pub derived_charger: DerivedCharger,

    #[serde(rename = "CallDescriptor")]
    pub call_descriptor: CallDescriptor,

    #[serde(rename = "CallCosts", default)]
    pub call_costs: Vec<CallCost>,
}

impl SessionRun {
    pub fn new(run_id: &str, call_descriptor: CallDescriptor) -> Self {
        Self {
            derived_charger: DerivedCharger {
                run_id: run_id.to_string(),
                run_filters: String::new(),
            },
            call_descriptor,
            call_costs: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.derived_charger.run_id
    }
}
