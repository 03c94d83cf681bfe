// src/agents/diameter/mod.rs
//! Diameter Credit-Control agent.
//!
//! - `dictionary`, `avp`, `message`, `codec`: wire format (RFC 6733)
//! - `ccr`: CCR projection onto generic events and CCA templating (RFC 4006)
//! - `processor`: configured request processor chain
//! - `agent`: TCP peer handling (CER/CEA, DWR/DWA, DPR/DPA, CCR/CCA)

pub mod agent;
pub mod avp;
pub mod ccr;
pub mod codec;
pub mod dictionary;
pub mod message;
pub mod processor;

pub use agent::DiameterAgent;
pub use codec::{DiameterCodec, DiameterError};
pub use message::Message;
pub use processor::{CcrProcessor, RequestProcessor};

use chrono::Duration;
use serde::Deserialize;

use crate::utils::time::duration_ns;

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:3868".to_string()
}

fn default_debit_interval() -> Duration {
    Duration::minutes(5)
}

fn default_origin_host() -> String {
    "CGR-DA".to_string()
}

fn default_origin_realm() -> String {
    "cgrates.org".to_string()
}

fn default_product_name() -> String {
    "CGRateS".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiameterAgentConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_true")]
    pub create_cdr: bool,
    /// Skip CDRs for terminates that matched no active session.
    #[serde(default = "default_true")]
    pub cdr_requires_session: bool,
    #[serde(default = "default_debit_interval", with = "duration_ns")]
    pub debit_interval: Duration,
    #[serde(default)]
    pub timezone: String,
    #[serde(default = "default_origin_host")]
    pub origin_host: String,
    #[serde(default = "default_origin_realm")]
    pub origin_realm: String,
    #[serde(default)]
    pub vendor_id: u32,
    #[serde(default = "default_product_name")]
    pub product_name: String,
    #[serde(default)]
    pub request_processors: Vec<RequestProcessor>,
}

impl Default for DiameterAgentConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            create_cdr: true,
            cdr_requires_session: true,
            debit_interval: default_debit_interval(),
            timezone: String::new(),
            origin_host: default_origin_host(),
            origin_realm: default_origin_realm(),
            vendor_id: 0,
            product_name: default_product_name(),
            request_processors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let cfg: DiameterAgentConfig = serde_json::from_str(
            r#"{
                "listen": "0.0.0.0:3868",
                "debit_interval": "30s",
                "request_processors": [{
                    "id": "voice",
                    "request_filter": "Service-Context-Id(~^voice)",
                    "flags": ["*accounts"],
                    "ccr_fields": [
                        {"tag": "OriginID", "field_id": "OriginID", "value": "Session-Id", "mandatory": true},
                        {"tag": "Usage", "field_id": "Usage", "type": "*handler", "handler_id": "*ccr_usage"}
                    ],
                    "cca_fields": [
                        {"tag": "GSU", "field_id": "Granted-Service-Unit>CC-Time", "value": "CGRMaxUsage", "field_filter": "CGRError(~^$)"}
                    ]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.debit_interval, Duration::seconds(30));
        assert!(cfg.create_cdr);
        assert_eq!(cfg.origin_host, "CGR-DA");
        let rp = &cfg.request_processors[0];
        assert_eq!(rp.request_filter.len(), 1);
        assert_eq!(rp.ccr_fields[1].handler_id, "*ccr_usage");
        assert_eq!(rp.cca_fields[0].field_filter.len(), 1);
        assert!(!rp.continue_on_success);
    }
}
