// src/engine/lcr.rs
//! Least cost routing reply and the supplier list derived from it.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

use crate::decimal::Dec;
use crate::error::ChargingError;
use crate::utils::time::duration_ns;

pub const LCR_STRATEGY_STATIC: &str = "*static";
pub const LCR_STRATEGY_LOWEST: &str = "*lowest_cost";
pub const LCR_STRATEGY_HIGHEST: &str = "*highest_cost";
pub const LCR_STRATEGY_QOS_THRESHOLD: &str = "*qos_threshold";
pub const LCR_STRATEGY_QOS: &str = "*qos";
pub const LCR_STRATEGY_LOAD: &str = "*load_distribution";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LcrEntry {
    #[serde(rename = "DestinationID", default)]
    pub destination_id: String,

    #[serde(rename = "RPCategory", default)]
    pub rp_category: String,

    #[serde(rename = "Strategy", default)]
    pub strategy: String,

    #[serde(rename = "StrategyParams", default)]
    pub strategy_params: String,

    #[serde(rename = "Weight", default)]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcrSupplierCost {
    /// Rating key `direction:tenant:category:subject`.
    #[serde(rename = "Supplier")]
    pub supplier: String,

    #[serde(rename = "Cost", default)]
    pub cost: Dec,

    #[serde(rename = "Duration", with = "duration_ns", default = "Duration::zero")]
    pub duration: Duration,

    #[serde(rename = "Error", default)]
    pub error: String,

    #[serde(rename = "QOS", default)]
    pub qos: HashMap<String, Dec>,
}

/// Reply of `Responder.GetLCR`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LcrCost {
    #[serde(rename = "Entry", default)]
    pub entry: Option<LcrEntry>,

    #[serde(rename = "SupplierCosts", default)]
    pub supplier_costs: Vec<LcrSupplierCost>,
}

impl LcrCost {
    pub fn has_errors(&self) -> bool {
        self.supplier_costs.iter().any(|sc| !sc.error.is_empty())
    }

    pub fn log_errors(&self) {
        for sc in self.supplier_costs.iter().filter(|sc| !sc.error.is_empty()) {
            error!("❌ LCR_ERROR: supplier {}: {}", sc.supplier, sc.error);
        }
    }

    /// Orders suppliers by cost for the cost strategies; others keep reply order.
    pub fn sort(&mut self) {
        let strategy = self
            .entry
            .as_ref()
            .map(|e| e.strategy.as_str())
            .unwrap_or_default();
        match strategy {
            LCR_STRATEGY_LOWEST | LCR_STRATEGY_QOS_THRESHOLD => {
                self.supplier_costs.sort_by(|a, b| a.cost.cmp(&b.cost))
            }
            LCR_STRATEGY_HIGHEST => {
                self.supplier_costs.sort_by(|a, b| b.cost.cmp(&a.cost))
            }
            _ => {}
        }
    }

    /// Supplier subjects without cost errors, in order.
    pub fn suppliers(&self) -> Result<Vec<String>, ChargingError> {
        if self.entry.is_none() {
            return Err(ChargingError::NotFound);
        }
        let mut out = Vec::new();
        for sc in &self.supplier_costs {
            if !sc.error.is_empty() {
                continue;
            }
            let parts: Vec<&str> = sc.supplier.split(':').collect();
            if parts.len() != 4 {
                return Err(ChargingError::ServerError(format!(
                    "invalid supplier key: {}",
                    sc.supplier
                )));
            }
            if !parts[3].is_empty() {
                out.push(parts[3].to_string());
            }
        }
        if out.is_empty() {
            return Err(ChargingError::NotFound);
        }
        Ok(out)
    }

    pub fn suppliers_string(&self) -> Result<String, ChargingError> {
        Ok(self.suppliers()?.join(","))
    }
}
