// tests/session_scenarios_test.rs
//! End to end session flows against the in-memory rating engine.

mod common;

use async_trait::async_trait;
use chrono::Duration;
use std::sync::{Arc, Mutex};

use apolo_charging_engine::error::ChargingError;
use apolo_charging_engine::sessions::{
    AttrDisconnectSession, ClientConnection, GenericEvent, SessionManagerConfig,
};
use common::{manager, FakeRating};

fn call(origin_id: &str, account: &str) -> GenericEvent {
    let mut ev = GenericEvent::new();
    ev.set("OriginID", origin_id);
    ev.set("ToR", "*voice");
    ev.set("RequestType", "*prepaid");
    ev.set("Tenant", "cgrates.org");
    ev.set("Account", account);
    ev.set("Destination", "1002");
    ev.set("AnswerTime", "2016-01-05T18:31:05Z");
    ev
}

#[derive(Default)]
struct RecordingPeer {
    reasons: Mutex<Vec<String>>,
}

#[async_trait]
impl ClientConnection for RecordingPeer {
    async fn disconnect_session(&self, args: &AttrDisconnectSession) -> Result<String, ChargingError> {
        self.reasons.lock().unwrap().push(args.reason.clone());
        Ok("OK".to_string())
    }
}

#[tokio::test]
async fn test_prepaid_call_refunds_unused_time() {
    let rating = FakeRating::new(3600);
    let m = manager(SessionManagerConfig::default(), rating.clone());

    let mut ev = call("scenario-1", "1001");
    ev.set("Usage", "2m");
    assert_eq!(m.initiate_session(ev.clone(), None).await.unwrap(), Duration::minutes(2));
    assert_eq!(m.session_count().await, 1);

    ev.set("Usage", "90s");
    m.terminate_session(ev, None).await.unwrap();

    assert_eq!(m.session_count().await, 0);
    assert_eq!(*rating.max_debits.lock().unwrap(), vec![120]);
    assert_eq!(*rating.refunds.lock().unwrap(), vec![30]);
    assert_eq!(*rating.stored_costs.lock().unwrap(), vec![90.0]);
}

#[tokio::test]
async fn test_no_credit_refuses_session() {
    let rating = FakeRating::new(3600);
    let m = manager(SessionManagerConfig::default(), rating.clone());

    let err = m
        .initiate_session(call("scenario-2", "broke"), None)
        .await
        .unwrap_err();
    assert_eq!(err, ChargingError::InsufficientCredit);
    assert_eq!(m.session_count().await, 0);
    assert_eq!(m.max_usage(call("scenario-2", "broke")).await.unwrap(), 0.0);

    let err = m
        .terminate_session(call("scenario-2", "broke"), None)
        .await
        .unwrap_err();
    assert_eq!(err, ChargingError::MandatoryIeMissing);
}

#[tokio::test(start_paused = true)]
async fn test_debit_loop_disconnects_when_credit_runs_out() {
    let rating = FakeRating::new(5);
    let m = manager(
        SessionManagerConfig {
            debit_interval: Duration::seconds(10),
            ..Default::default()
        },
        rating.clone(),
    );
    let peer = Arc::new(RecordingPeer::default());
    let conn_id = m.context().connections.add(peer.clone()).await;

    let granted = m
        .initiate_session(call("scenario-3", "1001"), Some(conn_id.clone()))
        .await
        .unwrap();
    assert_eq!(granted, Duration::seconds(10));

    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
    assert_eq!(*peer.reasons.lock().unwrap(), vec!["INSUFFICIENT_FUNDS"]);
    assert_eq!(m.connection_sessions(&conn_id).await.len(), 1);

    let mut end = call("scenario-3", "1001");
    end.set("Usage", "5s");
    m.terminate_session(end, Some(conn_id)).await.unwrap();
    assert_eq!(*rating.stored_costs.lock().unwrap(), vec![5.0]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_terminated_by_ttl() {
    let rating = FakeRating::new(3600);
    let m = manager(
        SessionManagerConfig {
            session_ttl: Duration::seconds(30),
            ..Default::default()
        },
        rating.clone(),
    );
    let mut ev = call("scenario-4", "1001");
    ev.set("Usage", "10s");
    m.initiate_session(ev, None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(31)).await;
    assert_eq!(m.session_count().await, 0);
    let cdrs = rating.cdrs.lock().unwrap();
    assert_eq!(cdrs.len(), 1);
    assert_eq!(cdrs[0].origin_id, "scenario-4");
    assert!(cdrs[0].usage >= Duration::seconds(10));
}

#[tokio::test]
async fn test_charge_event_stores_cost() {
    let rating = FakeRating::new(3600);
    let m = manager(SessionManagerConfig::default(), rating.clone());
    let mut ev = call("sms-1", "1001");
    ev.set("Usage", "20s");
    assert_eq!(m.charge_event(ev).await.unwrap(), Duration::seconds(20));
    assert_eq!(*rating.stored_costs.lock().unwrap(), vec![20.0]);
    assert_eq!(m.session_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_updates_are_serialized() {
    let rating = FakeRating::new(3600);
    let m = manager(SessionManagerConfig::default(), rating.clone());
    let mut ev = call("scenario-5", "1001");
    ev.set("Usage", "10s");
    m.initiate_session(ev.clone(), None).await.unwrap();

    let (a, b) = tokio::join!(
        m.update_session(ev.clone(), None),
        m.update_session(ev.clone(), None)
    );
    assert_eq!(a.unwrap(), Duration::seconds(10));
    assert_eq!(b.unwrap(), Duration::seconds(10));
    assert_eq!(*rating.max_debits.lock().unwrap(), vec![10, 10, 10]);

    ev.set("Usage", "30s");
    m.terminate_session(ev, None).await.unwrap();
    assert!(rating.refunds.lock().unwrap().is_empty());
    assert_eq!(*rating.stored_costs.lock().unwrap(), vec![30.0]);
}

#[tokio::test(start_paused = true)]
async fn test_update_overrides_ttl_settings() {
    let rating = FakeRating::new(3600);
    let m = manager(
        SessionManagerConfig {
            session_ttl: Duration::seconds(30),
            ..Default::default()
        },
        rating.clone(),
    );
    let mut ev = call("scenario-6", "1001");
    ev.set("Usage", "10s");
    m.initiate_session(ev.clone(), None).await.unwrap();

    ev.set("SessionTTL", "5s");
    ev.set("SessionTTLUsage", "3s");
    ev.set("SessionTTLLastUsed", "4s");
    m.update_session(ev, None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(4)).await;
    assert_eq!(m.session_count().await, 1);
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert_eq!(m.session_count().await, 0);

    // 10s initial, 4s of the 10s update, then 3s from the surplus
    let cdrs = rating.cdrs.lock().unwrap();
    assert_eq!(cdrs.len(), 1);
    assert_eq!(cdrs[0].usage, Duration::seconds(17));
}

#[tokio::test]
async fn test_update_with_out_of_range_usage() {
    let rating = FakeRating::new(3600);
    let m = manager(SessionManagerConfig::default(), rating.clone());
    let mut ev = call("scenario-7", "1001");
    ev.set("Usage", "10s");
    m.initiate_session(ev.clone(), None).await.unwrap();

    ev.set("Usage", "10000000000000000");
    let err = m.update_session(ev, None).await.unwrap_err();
    assert!(matches!(err, ChargingError::InvalidArgument(_)));
    assert_eq!(*rating.max_debits.lock().unwrap(), vec![10]);
    assert_eq!(m.session_count().await, 1);
}
