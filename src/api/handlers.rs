// src/api/handlers.rs
use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{AppState, HealthResponse, RpcReply, RpcRequest};
use crate::error::ChargingError;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "apolo-charging-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: state.node_id.clone(),
        active_sessions: state.rpc.manager().session_count().await,
    })
}

/// JSON-RPC over HTTP. Errors travel inside the reply body, the status is
/// always 200 like any JSON-RPC server.
pub async fn jsonrpc(req: web::Json<RpcRequest>, state: web::Data<AppState>) -> HttpResponse {
    let RpcRequest { method, params, id } = req.into_inner();
    debug!("HTTP JSON-RPC {} id={}", method, id);
    let res = state.rpc.dispatch(None, &method, params).await;
    if let Err(e) = &res {
        warn!("⚠️ {} failed: {}", method, e);
    }
    HttpResponse::Ok().json(RpcReply::from_result(id, res))
}

/// `GET /api/v1/sessions?Account=1001`: query parameters are field filters.
pub async fn active_sessions(
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ChargingError> {
    let sessions = state.rpc.manager().active_sessions(&query).await;
    if sessions.is_empty() {
        return Err(ChargingError::NotFound);
    }
    Ok(HttpResponse::Ok().json(sessions))
}

pub async fn active_sessions_count(
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let count = state.rpc.manager().active_sessions_count(&query).await;
    HttpResponse::Ok().json(serde_json::json!({ "count": count }))
}
