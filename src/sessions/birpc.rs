// src/sessions/birpc.rs
//! Method table of the `SMGenericV1` service shared by the HTTP JSON-RPC
//! endpoint and the bidirectional JSON listener.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::event::GenericEvent;
use super::manager::SessionManager;
use crate::error::ChargingError;
use crate::utils::consts::OK;
use crate::utils::time::duration_secs;

pub const SERVICE_NAME: &str = "SMGenericV1";

pub const METHODS: &[&str] = &[
    "MaxUsage",
    "LCRSuppliers",
    "InitiateSession",
    "UpdateSession",
    "TerminateSession",
    "ChargeEvent",
    "ProcessCDR",
    "ActiveSessions",
    "ActiveSessionsCount",
];

/// Go style JSON-RPC wraps the single argument in an array.
fn single_param<T: DeserializeOwned>(params: Value) -> Result<T, ChargingError> {
    let arg = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(arg).map_err(|e| ChargingError::ParserError(e.to_string()))
}

#[derive(Clone)]
pub struct BiRpcDispatcher {
    manager: Arc<SessionManager>,
}

impl BiRpcDispatcher {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Calls `"SMGenericV1.<Method>"`; `conn_id` identifies the caller for
    /// server initiated disconnects.
    pub async fn dispatch(
        &self,
        conn_id: Option<String>,
        method: &str,
        params: Value,
    ) -> Result<Value, ChargingError> {
        let Some((service, name)) = method.split_once('.') else {
            return Err(ChargingError::UnsupportedServiceMethod);
        };
        if service != SERVICE_NAME || !METHODS.contains(&name) {
            return Err(ChargingError::UnsupportedServiceMethod);
        }
        debug!("BiRPCV1{} from {:?}", name, conn_id);

        let m = &self.manager;
        let reply = match name {
            "MaxUsage" => json!(m.max_usage(single_param::<GenericEvent>(params)?).await?),
            "LCRSuppliers" => json!(m.lcr_suppliers(single_param(params)?).await?),
            "InitiateSession" => {
                let d = m.initiate_session(single_param(params)?, conn_id).await?;
                json!(duration_secs(d))
            }
            "UpdateSession" => {
                let d = m.update_session(single_param(params)?, conn_id).await?;
                json!(duration_secs(d))
            }
            "TerminateSession" => {
                m.terminate_session(single_param(params)?, conn_id).await?;
                json!(OK)
            }
            "ChargeEvent" => json!(duration_secs(m.charge_event(single_param(params)?).await?)),
            "ProcessCDR" => {
                m.process_cdr(single_param(params)?).await?;
                json!(OK)
            }
            "ActiveSessions" => {
                let filters: HashMap<String, String> = single_param(params)?;
                let found = m.active_sessions(&filters).await;
                if found.is_empty() {
                    return Err(ChargingError::NotFound);
                }
                serde_json::to_value(found).map_err(|e| ChargingError::ServerError(e.to_string()))?
            }
            "ActiveSessionsCount" => {
                let filters: HashMap<String, String> = single_param(params)?;
                json!(m.active_sessions_count(&filters).await)
            }
            _ => return Err(ChargingError::UnsupportedServiceMethod),
        };
        Ok(reply)
    }
}
