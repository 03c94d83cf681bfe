// tests/diameter_test.rs
//! Credit-Control round trips over TCP against the Diameter agent.

mod common;

use chrono::Duration;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use apolo_charging_engine::agents::diameter::avp::Avp;
use apolo_charging_engine::agents::diameter::ccr::{CGR_ERROR, CGR_MAX_USAGE};
use apolo_charging_engine::agents::diameter::dictionary::{
    APP_ID_BASE, APP_ID_CREDIT_CONTROL, CMD_CAPABILITIES_EXCHANGE, CMD_CREDIT_CONTROL,
};
use apolo_charging_engine::agents::diameter::{
    CcrProcessor, DiameterAgent, DiameterCodec, Message, RequestProcessor,
};
use apolo_charging_engine::agents::diameter::DiameterAgentConfig;
use apolo_charging_engine::sessions::SessionManagerConfig;
use apolo_charging_engine::utils::{parse_rsr_fields, FieldTemplate};
use common::{manager, FakeRating};

fn voice_processor() -> RequestProcessor {
    RequestProcessor {
        id: "voice".into(),
        request_filter: parse_rsr_fields("Service-Context-Id(~^voice@)").unwrap(),
        ccr_fields: vec![
            FieldTemplate::composed("ToR", "^*voice").unwrap(),
            FieldTemplate::composed("OriginID", "Session-Id").unwrap().mandatory(),
            FieldTemplate::composed("RequestType", "^*prepaid").unwrap(),
            FieldTemplate::composed("Tenant", "^cgrates.org").unwrap(),
            FieldTemplate::composed("Account", "Subscription-Id>Subscription-Id-Data")
                .unwrap()
                .mandatory(),
            FieldTemplate::composed("Destination", "^1002").unwrap(),
            FieldTemplate::composed("Usage", "Used-Service-Unit>CC-Time").unwrap(),
        ],
        cca_fields: vec![
            FieldTemplate::composed("Granted-Service-Unit>CC-Time", CGR_MAX_USAGE)
                .unwrap()
                .with_filter("CGRError(~^$)")
                .unwrap(),
            FieldTemplate::composed("Error-Message", CGR_ERROR).unwrap(),
        ],
        ..Default::default()
    }
}

async fn start_agent(rating: Arc<FakeRating>) -> (std::net::SocketAddr, CancellationToken) {
    let cfg = DiameterAgentConfig {
        debit_interval: Duration::zero(),
        request_processors: vec![voice_processor()],
        ..Default::default()
    };
    let sessions = manager(SessionManagerConfig::default(), rating);
    let agent = DiameterAgent::new(Arc::new(CcrProcessor::new(Arc::new(cfg), sessions, None)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = agent.shutdown_token();
    tokio::spawn(async move { agent.serve(listener).await });
    (addr, token)
}

fn ccr(hbh: u32, account: &str, request_type: &str, used_secs: &str) -> Message {
    let mut m = Message::request(CMD_CREDIT_CONTROL, APP_ID_CREDIT_CONTROL, hbh, hbh)
        .with_avp("Session-Id", "diam-call-1")
        .unwrap()
        .with_avp("Service-Context-Id", "voice@huawei.com")
        .unwrap()
        .with_avp("CC-Request-Type", request_type)
        .unwrap()
        .with_avp("CC-Request-Number", &hbh.to_string())
        .unwrap();
    m.add(
        Avp::grouped(
            "Subscription-Id",
            vec![
                Avp::from_text("Subscription-Id-Type", "0").unwrap(),
                Avp::from_text("Subscription-Id-Data", account).unwrap(),
            ],
        )
        .unwrap(),
    );
    m.set_with_path(&["Used-Service-Unit", "CC-Time"], used_secs, false)
        .unwrap();
    m
}

async fn exchange(conn: &mut Framed<TcpStream, DiameterCodec>, req: Message) -> Message {
    conn.send(req).await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), conn.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

async fn connect(addr: std::net::SocketAddr) -> Framed<TcpStream, DiameterCodec> {
    let mut conn = Framed::new(TcpStream::connect(addr).await.unwrap(), DiameterCodec);
    let cer = Message::request(CMD_CAPABILITIES_EXCHANGE, APP_ID_BASE, 1, 1)
        .with_avp("Origin-Host", "pgw.test")
        .unwrap();
    let cea = exchange(&mut conn, cer).await;
    assert_eq!(cea.value(&["Result-Code"]).as_deref(), Some("2001"));
    conn
}

#[tokio::test]
async fn test_initial_and_terminate_over_tcp() {
    let rating = FakeRating::new(300);
    let (addr, token) = start_agent(rating.clone()).await;
    let mut conn = connect(addr).await;

    let cca = exchange(&mut conn, ccr(2, "1001", "1", "120")).await;
    assert_eq!(cca.hop_by_hop, 2);
    assert_eq!(cca.value(&["Session-Id"]).as_deref(), Some("diam-call-1"));
    assert_eq!(cca.value(&["Result-Code"]).as_deref(), Some("2001"));
    assert_eq!(cca.value(&["Granted-Service-Unit", "CC-Time"]).as_deref(), Some("120"));
    assert_eq!(*rating.max_debits.lock().unwrap(), vec![120]);

    let cca = exchange(&mut conn, ccr(3, "1001", "3", "90")).await;
    assert_eq!(cca.value(&["Result-Code"]).as_deref(), Some("2001"));
    assert_eq!(*rating.refunds.lock().unwrap(), vec![30]);
    assert_eq!(*rating.stored_costs.lock().unwrap(), vec![90.0]);
    assert_eq!(rating.cdrs.lock().unwrap().len(), 1);
    assert_eq!(rating.cdrs.lock().unwrap()[0].account, "1001");

    token.cancel();
}

#[tokio::test]
async fn test_initial_without_credit() {
    let rating = FakeRating::new(300);
    let (addr, token) = start_agent(rating.clone()).await;
    let mut conn = connect(addr).await;

    let cca = exchange(&mut conn, ccr(2, "broke", "1", "120")).await;
    assert_eq!(cca.value(&["Result-Code"]).as_deref(), Some("2001"));
    assert_eq!(cca.value(&["Error-Message"]).as_deref(), Some("INSUFFICIENT_CREDIT"));
    assert!(cca.value(&["Granted-Service-Unit", "CC-Time"]).is_none());
    assert!(rating.max_debits.lock().unwrap().is_empty());

    token.cancel();
}
