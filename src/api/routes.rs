// src/api/routes.rs
use actix_web::web;
use crate::api::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/jsonrpc", web::post().to(handlers::jsonrpc))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(handlers::health_check))
                .route("/jsonrpc", web::post().to(handlers::jsonrpc))
                .route("/sessions", web::get().to(handlers::active_sessions))
                .route("/sessions/count", web::get().to(handlers::active_sessions_count)),
        );
}
