// tests/common/mod.rs
//! In-memory rating engine and CDR store shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};

use apolo_charging_engine::cgrates::{CdrSink, Responder};
use apolo_charging_engine::decimal::Dec;
use apolo_charging_engine::engine::{
    AttrStoreSmCost, CallCost, CallDescriptor, Cdr, LcrCost, SessionRun, TimeSpan,
};
use apolo_charging_engine::error::ChargingError;
use apolo_charging_engine::sessions::{
    EventDefaults, ExternalConnections, SessionContext, SessionManager, SessionManagerConfig,
};

/// Grants at most `grant_secs` per debit at one cent per second. An
/// account called `broke` has no credit at all.
#[derive(Default)]
pub struct FakeRating {
    pub grant_secs: i64,
    pub max_debits: Mutex<Vec<i64>>,
    pub refunds: Mutex<Vec<i64>>,
    pub stored_costs: Mutex<Vec<f64>>,
    pub cdrs: Mutex<Vec<Cdr>>,
}

impl FakeRating {
    pub fn new(grant_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            grant_secs,
            ..Default::default()
        })
    }

    fn cost(cd: &CallDescriptor, granted: Duration) -> CallCost {
        let mut cc = CallCost {
            tenant: cd.tenant.clone(),
            account: cd.account.clone(),
            destination: cd.destination.clone(),
            timespans: vec![TimeSpan::with_increments(
                cd.time_start,
                Duration::seconds(1),
                granted.num_seconds(),
                Dec::new(1, 2),
            )],
            ..Default::default()
        };
        cc.update_cost();
        cc
    }
}

#[async_trait]
impl Responder for FakeRating {
    async fn get_session_runs(&self, event: &Cdr) -> Result<Vec<SessionRun>, ChargingError> {
        if event.account == "broke" {
            return Err(ChargingError::InsufficientCredit);
        }
        let start = event.answer_time.or(event.setup_time).unwrap_or_else(Utc::now);
        Ok(vec![SessionRun::new(
            "*default",
            CallDescriptor {
                tenant: event.tenant.clone(),
                category: event.category.clone(),
                account: event.account.clone(),
                subject: event.subject.clone(),
                destination: event.destination.clone(),
                time_start: start,
                time_end: start + event.usage,
                ..Default::default()
            },
        )])
    }

    async fn get_derived_max_session_time(&self, event: &Cdr) -> Result<f64, ChargingError> {
        if event.account == "broke" {
            return Ok(0.0);
        }
        Ok(self.grant_secs as f64)
    }

    async fn max_debit(&self, cd: &CallDescriptor) -> Result<CallCost, ChargingError> {
        let granted = cd.duration().min(Duration::seconds(self.grant_secs));
        self.max_debits.lock().unwrap().push(granted.num_seconds());
        Ok(Self::cost(cd, granted))
    }

    async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, ChargingError> {
        Ok(Self::cost(cd, cd.duration()))
    }

    async fn refund_increments(&self, cd: &CallDescriptor) -> Result<f64, ChargingError> {
        let n: i64 = cd.increments.iter().map(|i| i.compress_factor).sum();
        self.refunds.lock().unwrap().push(n);
        Ok(0.0)
    }

    async fn get_lcr(&self, _cd: &CallDescriptor) -> Result<LcrCost, ChargingError> {
        Err(ChargingError::NotFound)
    }
}

#[async_trait]
impl CdrSink for FakeRating {
    async fn process_cdr(&self, cdr: &Cdr) -> Result<(), ChargingError> {
        self.cdrs.lock().unwrap().push(cdr.clone());
        Ok(())
    }

    async fn store_sm_cost(&self, attr: &AttrStoreSmCost) -> Result<(), ChargingError> {
        self.stored_costs.lock().unwrap().push(attr.cost.usage);
        Ok(())
    }
}

pub fn manager(cfg: SessionManagerConfig, rating: Arc<FakeRating>) -> Arc<SessionManager> {
    SessionManager::new(
        cfg,
        SessionContext {
            responder: rating.clone(),
            cdrs: rating,
            connections: Arc::new(ExternalConnections::new()),
            defaults: EventDefaults::default(),
            post_action_trigger: false,
        },
    )
}

/// Polls `check` for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
