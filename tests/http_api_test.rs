// tests/http_api_test.rs
mod common;

use actix_web::{test, web, App};
use serde_json::{json, Value};

use apolo_charging_engine::api::{routes, AppState, HealthResponse};
use apolo_charging_engine::sessions::{BiRpcDispatcher, SessionManagerConfig};
use common::{manager, FakeRating};

fn state(rating: std::sync::Arc<FakeRating>) -> web::Data<AppState> {
    let m = manager(SessionManagerConfig::default(), rating);
    web::Data::new(AppState::new(BiRpcDispatcher::new(m), "node-test"))
}

fn call_event() -> Value {
    json!({
        "OriginID": "http-call-1",
        "ToR": "*voice",
        "RequestType": "*prepaid",
        "Tenant": "cgrates.org",
        "Account": "1001",
        "Destination": "1002",
        "AnswerTime": "2016-01-05T18:31:05Z",
        "Usage": "60s"
    })
}

#[actix_web::test]
async fn test_health_endpoint() {
    let app = test::init_service(
        App::new().app_data(state(FakeRating::new(3600))).configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let resp: HealthResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp.status, "healthy");
    assert_eq!(resp.node_id, "node-test");
    assert_eq!(resp.active_sessions, 0);
}

#[actix_web::test]
async fn test_jsonrpc_errors_travel_in_body() {
    let app = test::init_service(
        App::new().app_data(state(FakeRating::new(3600))).configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/jsonrpc")
        .set_json(json!({"method": "SMGenericV1.Unknown", "params": [{}], "id": 1}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["result"], Value::Null);
    assert_eq!(body["error"], json!("SERVER_ERROR: UNSUPPORTED_SERVICE_METHOD"));
}

#[actix_web::test]
async fn test_session_lifecycle_over_jsonrpc() {
    let rating = FakeRating::new(3600);
    let app = test::init_service(
        App::new().app_data(state(rating.clone())).configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/sessions").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);

    let req = test::TestRequest::post()
        .uri("/api/v1/jsonrpc")
        .set_json(json!({"method": "SMGenericV1.InitiateSession", "params": [call_event()], "id": 2}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["error"], Value::Null);
    assert_eq!(body["result"], json!(60.0));

    let req = test::TestRequest::get()
        .uri("/api/v1/sessions?Account=1001")
        .to_request();
    let sessions: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["OriginID"], json!("http-call-1"));

    let req = test::TestRequest::get()
        .uri("/api/v1/sessions/count?Account=1002")
        .to_request();
    let count: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(count, json!({"count": 0}));

    let mut terminate = call_event();
    terminate["Usage"] = json!("45s");
    let req = test::TestRequest::post()
        .uri("/jsonrpc")
        .set_json(json!({"method": "SMGenericV1.TerminateSession", "params": [terminate], "id": 3}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["result"], json!("OK"));

    assert_eq!(*rating.stored_costs.lock().unwrap(), vec![45.0]);
    assert_eq!(*rating.refunds.lock().unwrap(), vec![15]);
}
