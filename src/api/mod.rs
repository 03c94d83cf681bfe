// src/api/mod.rs
//! Outer RPC surfaces: HTTP (health, JSON-RPC, session listing) and the
//! bidirectional JSON listener. Both route into [`BiRpcDispatcher`].

pub mod bijson;
pub mod handlers;
pub mod routes;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChargingError;
use crate::sessions::BiRpcDispatcher;

/// Shared by every HTTP worker.
#[derive(Clone)]
pub struct AppState {
    pub rpc: BiRpcDispatcher,
    /// Reported by the health endpoint.
    pub node_id: String,
}

impl AppState {
    pub fn new(rpc: BiRpcDispatcher, node_id: impl Into<String>) -> Self {
        Self {
            rpc,
            node_id: node_id.into(),
        }
    }
}

/// `{"method": "SMGenericV1.X", "params": [...], "id": N}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// Exactly one of `result` and `error` is non null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcReply {
    pub id: Value,
    pub result: Value,
    pub error: Value,
}

impl RpcReply {
    pub fn from_result(id: Value, res: Result<Value, ChargingError>) -> Self {
        match res {
            Ok(result) => Self {
                id,
                result,
                error: Value::Null,
            },
            Err(e) => Self {
                id,
                result: Value::Null,
                error: Value::String(e.to_rpc_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub node_id: String,
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_carries_rpc_error_string() {
        let ok = RpcReply::from_result(json!(1), Ok(json!("OK")));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"id": 1, "result": "OK", "error": null}));

        let err = RpcReply::from_result(json!(2), Err(ChargingError::InsufficientCredit));
        assert_eq!(err.error, json!("SERVER_ERROR: INSUFFICIENT_CREDIT"));
        assert_eq!(err.result, Value::Null);

        let nf = RpcReply::from_result(json!(3), Err(ChargingError::NotFound));
        assert_eq!(nf.error, json!("NOT_FOUND"));
    }

    #[test]
    fn test_request_defaults() {
        let req: RpcRequest = serde_json::from_str(r#"{"method":"SMGenericV1.ActiveSessionsCount"}"#).unwrap();
        assert_eq!(req.params, Value::Null);
        assert_eq!(req.id, Value::Null);
    }
}
