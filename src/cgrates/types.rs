//! Wire types for the JSON-RPC calls made to the rating engine and CDR store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// Request JSON-RPC 2.0
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<T> {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<T>,
    pub id: u64,
}

/// Response JSON-RPC. The error is either a plain string or an object
/// carrying a `message`.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct JsonRpcResponse<T> {
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl<T> JsonRpcResponse<T> {
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => Some(
                obj.get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
            ),
            other => Some(other.to_string()),
        }
    }
}

// ============================================================================
// ResourceS Types
// ============================================================================

/// Arguments of `RLsV1.InitiateResourceUsage` / `TerminateResourceUsage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsageArgs {
    #[serde(rename = "UsageID")]
    pub usage_id: String,

    #[serde(rename = "Event")]
    pub event: HashMap<String, Value>,

    #[serde(rename = "Units")]
    pub units: f64,
}

/// Arguments of `Responder.GetLCR`.
#[derive(Debug, Clone, Serialize)]
pub struct AttrGetLcr<'a> {
    #[serde(flatten)]
    pub call_descriptor: &'a crate::engine::CallDescriptor,

    #[serde(rename = "Paginator", skip_serializing_if = "Option::is_none")]
    pub paginator: Option<Value>,
}
