// src/sessions/session.rs
//! One derived charging run bound to a session id.
//!
//! The session owns its call descriptor and the call costs returned by the
//! rating engine. Time debited on top of what was asked is kept as
//! `extra_duration` and consumed by the following debits.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::active::ActiveSession;
use super::connections::{AttrDisconnectSession, ExternalConnections};
use super::event::{EventDefaults, GenericEvent};
use crate::cgrates::{CdrSink, Responder};
use crate::engine::{AttrStoreSmCost, CallCost, CallDescriptor, SmCost, TriggerIds};
use crate::error::ChargingError;
use crate::utils::consts::*;
use crate::utils::time::duration_secs;

/// Services and settings shared by every session of a manager.
#[derive(Clone)]
pub struct SessionContext {
    pub responder: Arc<dyn Responder>,
    pub cdrs: Arc<dyn CdrSink>,
    pub connections: Arc<ExternalConnections>,
    pub defaults: EventDefaults,
    pub post_action_trigger: bool,
}

struct SessionState {
    cd: CallDescriptor,
    call_costs: Vec<CallCost>,
    extra_duration: Duration,
    last_usage: Duration,
    last_debit: Duration,
    total_usage: Duration,
}

pub struct Session {
    event_start: RwLock<GenericEvent>,
    run_id: String,
    conn_id: Option<String>,
    ctx: SessionContext,
    state: Mutex<SessionState>,
    stop_debit: CancellationToken,
}

impl Session {
    pub fn new(
        event_start: GenericEvent,
        run_id: &str,
        mut cd: CallDescriptor,
        conn_id: Option<String>,
        stop_debit: CancellationToken,
        ctx: SessionContext,
    ) -> Self {
        if cd.unique_id.is_empty() {
            cd.unique_id = event_start.unique_id(&ctx.defaults.timezone);
        }
        if cd.run_id.is_empty() {
            cd.run_id = run_id.to_string();
        }
        Self {
            event_start: RwLock::new(event_start),
            run_id: run_id.to_string(),
            conn_id,
            ctx,
            state: Mutex::new(SessionState {
                cd,
                call_costs: Vec::new(),
                extra_duration: Duration::zero(),
                last_usage: Duration::zero(),
                last_debit: Duration::zero(),
                total_usage: Duration::zero(),
            }),
            stop_debit,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn conn_id(&self) -> Option<&str> {
        self.conn_id.as_deref()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop_debit
    }

    pub async fn event_start(&self) -> GenericEvent {
        self.event_start.read().await.clone()
    }

    pub async fn origin_id(&self) -> String {
        self.event_start.read().await.origin_id()
    }

    /// Rewrites the session id after a relocation.
    pub async fn set_origin_id(&self, origin_id: &str) {
        self.event_start.write().await.set(ACCID, origin_id);
    }

    pub async fn total_usage(&self) -> Duration {
        self.state.lock().await.total_usage
    }

    pub async fn set_total_usage(&self, usage: Duration) {
        self.state.lock().await.total_usage = usage;
    }

    pub async fn last_usage(&self) -> Duration {
        self.state.lock().await.last_usage
    }

    pub async fn extra_duration(&self) -> Duration {
        self.state.lock().await.extra_duration
    }

    pub async fn call_costs(&self) -> Vec<CallCost> {
        self.state.lock().await.call_costs.clone()
    }

    pub async fn call_descriptor(&self) -> CallDescriptor {
        self.state.lock().await.cd.clone()
    }

    /// Debits `dur` and returns the duration the client may use.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn debit(&self, dur: Duration, last_used: Option<Duration>) -> Result<Duration, ChargingError> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        st.cd.post_action_trigger = self.ctx.post_action_trigger;
        let requested = dur;
        let mut dur = dur;
        let before = (st.extra_duration, st.last_usage, st.last_debit, st.total_usage);

        if let Some(last_used) = last_used {
            st.extra_duration = st.last_debit - last_used;
            if last_used != st.last_usage {
                st.total_usage = st.total_usage - st.last_usage + last_used;
            }
            if let Some(last_cc) = st.call_costs.last_mut() {
                let (exe, unexe) = last_cc.post_action_triggers(last_used);
                st.cd.exe_at_ids = exe;
                st.cd.unexe_at_ids = unexe;
            }
        }
        if st.extra_duration < Duration::zero() {
            st.extra_duration = Duration::zero();
        }

        if st.extra_duration >= dur {
            // a failed trigger debit leaves the accounting untouched
            if st.cd.has_pending_triggers() {
                let mut fake = st.cd.clone();
                fake.time_end = fake.time_start;
                if let Err(e) = self.ctx.responder.debit(&fake).await {
                    (st.extra_duration, st.last_usage, st.last_debit, st.total_usage) = before;
                    warn!("⚠️ Trigger debit failed: {}", e);
                    return Err(e);
                }
            }
            st.last_usage = requested;
            st.total_usage = st.total_usage + requested;
            st.last_debit = st.extra_duration;
            st.extra_duration = st.extra_duration - dur;
            debug!("Debit served from surplus, {:?} left", st.extra_duration);
            return Ok(requested);
        }

        dur = dur - st.extra_duration;
        let initial_extra = st.extra_duration;
        st.extra_duration = Duration::zero();
        let (prev_start, prev_end, prev_index) = (st.cd.time_start, st.cd.time_end, st.cd.duration_index);
        if st.cd.loop_index > 0 {
            st.cd.time_start = st.cd.time_end;
        }
        st.cd.time_end = st.cd.time_start + dur;
        st.cd.duration_index = st.cd.duration_index + dur;

        let cc = match self.ctx.responder.max_debit(&st.cd).await {
            Ok(cc) => cc,
            Err(e) => {
                st.last_usage = Duration::zero();
                st.last_debit = Duration::zero();
                st.cd.time_start = prev_start;
                st.cd.time_end = prev_end;
                st.cd.duration_index = prev_index;
                warn!("⚠️ MaxDebit failed: {}", e);
                return Err(e);
            }
        };

        st.cd.time_end = cc.end_time().unwrap_or(st.cd.time_start);
        let cc_duration = cc.duration();
        if cc_duration > dur {
            st.extra_duration = cc_duration - dur;
        }
        st.last_usage = if cc_duration >= dur { requested } else { cc_duration };
        st.cd.duration_index = st.cd.duration_index - dur + cc_duration;
        st.cd.max_cost_so_far += cc.cost;
        st.cd.loop_index += 1;
        st.call_costs.push(cc);
        st.last_debit = initial_extra + cc_duration;
        st.total_usage = st.total_usage + st.last_usage;

        if cc_duration >= dur {
            Ok(requested)
        } else {
            Ok(st.last_debit)
        }
    }

    /// Background debits every `interval` until the stop token fires.
    pub async fn debit_loop(self: Arc<Self>, interval: Duration) {
        let stop = self.stop_debit.clone();
        let mut sleep_for = std::time::Duration::ZERO;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            match self.debit(interval, None).await {
                Err(e) => {
                    error!("❌ Could not complete debit on session run {}: {}", self.run_id, e);
                    let reason = if e.is_unauthorized() {
                        e.to_string()
                    } else {
                        SYSTEM_ERROR.to_string()
                    };
                    if let Err(e) = self.disconnect(&reason).await {
                        error!("❌ Could not disconnect session: {}", e);
                    }
                    return;
                }
                Ok(granted) if granted < interval => {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(granted.to_std().unwrap_or_default()) => {}
                    }
                    if let Err(e) = self.disconnect(INSUFFICIENT_FUNDS).await {
                        error!("❌ Could not disconnect session: {}", e);
                    }
                    return;
                }
                Ok(_) => sleep_for = interval.to_std().unwrap_or_default(),
            }
        }
    }

    /// Settles the run at `end`: debits a shortfall or refunds the surplus.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn close(&self, end: DateTime<Utc>) -> Result<(), ChargingError> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let Some(last_cc) = st.call_costs.last() else {
            return Ok(());
        };
        let charged_end = last_cc.end_time().unwrap_or(st.cd.time_end);
        let last_duration = last_cc.duration();

        if end > charged_end {
            let extra = end - charged_end;
            if st.cd.loop_index > 0 {
                st.cd.time_start = st.cd.time_end;
            }
            st.cd.time_end = st.cd.time_start + extra;
            st.cd.duration_index = st.cd.duration_index + extra;
            let res = self.ctx.responder.debit(&st.cd).await;
            if let Ok(cc) = &res {
                st.call_costs.push(cc.clone());
            }
            merge_call_costs(&mut st.call_costs);
            return res.map(|_| ());
        }

        // merged costs end where the last one does
        let refund = charged_end - end;
        let triggers = match st.call_costs.last_mut() {
            Some(cc) => cc.post_action_triggers(last_duration - refund),
            None => (TriggerIds::new(), TriggerIds::new()),
        };
        merge_call_costs(&mut st.call_costs);
        self.refund(st, refund, triggers).await
    }

    async fn refund(
        &self,
        st: &mut SessionState,
        refund: Duration,
        (exe, unexe): (TriggerIds, TriggerIds),
    ) -> Result<(), ChargingError> {
        if refund <= Duration::zero() {
            return Ok(());
        }
        let Some(first) = st.call_costs.first_mut() else {
            return Ok(());
        };
        let increments = first.truncate_timespans_at_duration(refund);
        if !increments.is_empty() {
            let mut cd = first.create_call_descriptor();
            cd.increments = increments;
            cd.unique_id = st.cd.unique_id.clone();
            cd.run_id = st.cd.run_id.clone();
            cd.exe_at_ids = exe;
            cd.unexe_at_ids = unexe;
            self.ctx.responder.refund_increments(&cd).await?;
            info!("↩️ Refunded {:?} on run {}", refund, self.run_id);
        } else if !exe.is_empty() || !unexe.is_empty() {
            let mut cd = first.create_call_descriptor();
            cd.exe_at_ids = exe;
            cd.unexe_at_ids = unexe;
            self.ctx.responder.debit(&cd).await?;
        }
        first.update_cost();
        first.update_rated_usage();
        first.compress();
        Ok(())
    }

    /// Stores the merged cost of this run with duplicate checking.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn save_operations(&self, origin_id: &str) -> Result<(), ChargingError> {
        let event = self.event_start().await;
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let Some(first) = st.call_costs.first() else {
            return Ok(());
        };
        let attr = AttrStoreSmCost {
            cost: SmCost {
                unique_id: event.unique_id(&self.ctx.defaults.timezone),
                cost_source: SESSION_MANAGER_SOURCE.to_string(),
                run_id: self.run_id.clone(),
                origin_host: event.origin_host(),
                origin_id: origin_id.to_string(),
                usage: duration_secs(st.total_usage),
                cost_details: first.clone(),
            },
            check_duplicate: true,
        };
        match self.ctx.cdrs.store_sm_cost(&attr).await {
            Ok(()) => Ok(()),
            Err(ChargingError::Exists) => {
                warn!("⚠️ Session cost already stored for {}, refunding", origin_id);
                let whole = first.duration();
                let triggers = match st.call_costs.last_mut() {
                    Some(cc) => cc.post_action_triggers(Duration::zero()),
                    None => (TriggerIds::new(), TriggerIds::new()),
                };
                if let Err(e) = self.refund(st, whole, triggers).await {
                    error!("❌ Refund of duplicate session cost failed: {}", e);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Asks the originating client to hang up.
    pub async fn disconnect(&self, reason: &str) -> Result<(), ChargingError> {
        let conn = match &self.conn_id {
            Some(id) => self.ctx.connections.get(id).await,
            None => None,
        };
        let conn = conn.ok_or_else(|| {
            ChargingError::ServerError(
                "Calling SMGClientV1.DisconnectSession requires bidirectional JSON connection".into(),
            )
        })?;
        let args = AttrDisconnectSession {
            event_start: self.event_start().await,
            reason: reason.to_string(),
        };
        let reply = conn.disconnect_session(&args).await?;
        if reply != OK {
            return Err(ChargingError::ServerError(format!(
                "Unexpected disconnect reply: {}",
                reply
            )));
        }
        info!("🛑 Session {} disconnected: {}", args.event_start.origin_id(), reason);
        Ok(())
    }

    pub async fn as_active_session(&self) -> ActiveSession {
        // never hold the event lock together with the state lock
        let ev = self.event_start().await;
        let st = self.state.lock().await;
        let d = &self.ctx.defaults;
        let tz = d.timezone.as_str();
        ActiveSession {
            unique_id: ev.unique_id(tz),
            tor: ev.tor(),
            run_id: self.run_id.clone(),
            origin_id: ev.origin_id(),
            cdr_host: ev.origin_host(),
            cdr_source: ev.cdr_source(),
            req_type: ev.request_type(d),
            direction: ev.direction(),
            tenant: ev.tenant(d),
            category: ev.category(d),
            account: ev.account(),
            subject: ev.subject(),
            destination: ev.destination(),
            setup_time: ev.setup_time(tz).ok().flatten(),
            answer_time: ev.answer_time(tz).ok().flatten(),
            usage: st.total_usage,
            pdd: ev.pdd().unwrap_or_else(|_| Duration::zero()),
            extra_fields: ev.extra_fields(),
            supplier: ev.supplier(),
            sm_id: SMG_ID.to_string(),
            loop_index: st.cd.loop_index,
            duration_index: st.cd.duration_index,
            max_rate: st.cd.max_rate,
            max_rate_unit: st.cd.max_rate_unit,
            max_cost_so_far: st.cd.max_cost_so_far,
        }
    }
}

/// Folds every cost into the first one; the others are dropped.
fn merge_call_costs(ccs: &mut Vec<CallCost>) {
    if ccs.len() < 2 {
        return;
    }
    let rest: Vec<CallCost> = ccs.drain(1..).collect();
    for cc in rest {
        ccs[0].merge(cc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgrates::{MockCdrSink, MockResponder};
    use crate::decimal::Dec;
    use crate::engine::TimeSpan;
    use crate::sessions::connections::MockClientConnection;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 11, 9, 14, 22, 2).unwrap()
    }

    fn cost_for(cd: &CallDescriptor, grant: Duration) -> CallCost {
        let steps = grant.num_seconds();
        let mut cc = CallCost {
            tenant: cd.tenant.clone(),
            account: cd.account.clone(),
            timespans: vec![TimeSpan::with_increments(
                cd.time_start,
                Duration::seconds(1),
                steps,
                Dec::new(1, 2),
            )],
            ..Default::default()
        };
        cc.update_cost();
        cc
    }

    fn event() -> GenericEvent {
        let mut ev = GenericEvent::new();
        ev.set(ACCID, "c1");
        ev.set(ACCOUNT, "1001");
        ev.set(DESTINATION, "1002");
        ev.set(ANSWER_TIME, "2015-11-09T14:22:02Z");
        ev
    }

    fn session(responder: MockResponder, cdrs: MockCdrSink) -> Session {
        session_with(responder, cdrs, false)
    }

    fn session_with(responder: MockResponder, cdrs: MockCdrSink, post_action_trigger: bool) -> Session {
        let cd = CallDescriptor {
            tenant: "cgrates.org".into(),
            account: "1001".into(),
            time_start: t0(),
            time_end: t0(),
            ..Default::default()
        };
        let ctx = SessionContext {
            responder: Arc::new(responder),
            cdrs: Arc::new(cdrs),
            connections: Arc::new(ExternalConnections::new()),
            defaults: EventDefaults::default(),
            post_action_trigger,
        };
        Session::new(event(), META_DEFAULT, cd, None, CancellationToken::new(), ctx)
    }

    /// Grants up to `max` seconds per MaxDebit.
    fn granting(max: i64) -> MockResponder {
        let mut r = MockResponder::new();
        r.expect_max_debit().returning(move |cd| {
            let grant = cd.duration().min(Duration::seconds(max));
            Ok(cost_for(cd, grant))
        });
        r
    }

    #[tokio::test]
    async fn test_debit_full_grant_advances_descriptor() {
        let s = session(granting(60), MockCdrSink::new());
        let got = s.debit(Duration::seconds(60), None).await.unwrap();
        assert_eq!(got, Duration::seconds(60));
        let got = s.debit(Duration::seconds(60), None).await.unwrap();
        assert_eq!(got, Duration::seconds(60));

        let cd = s.call_descriptor().await;
        assert_eq!(cd.loop_index, 2);
        assert_eq!(cd.time_start, t0() + Duration::seconds(60));
        assert_eq!(cd.time_end, t0() + Duration::seconds(120));
        assert_eq!(cd.duration_index, Duration::seconds(120));
        assert_eq!(s.total_usage().await, Duration::seconds(120));
        assert_eq!(s.extra_duration().await, Duration::zero());
    }

    #[tokio::test]
    async fn test_debit_partial_grant() {
        let s = session(granting(30), MockCdrSink::new());
        let got = s.debit(Duration::seconds(60), None).await.unwrap();
        assert_eq!(got, Duration::seconds(30));
        assert_eq!(s.last_usage().await, Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_debit_over_grant_is_consumed_later() {
        let mut r = MockResponder::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        r.expect_max_debit().returning(move |cd| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(cost_for(cd, Duration::seconds(90)))
        });
        let s = session(r, MockCdrSink::new());
        assert_eq!(s.debit(Duration::seconds(30), None).await.unwrap(), Duration::seconds(30));
        assert_eq!(s.extra_duration().await, Duration::seconds(60));
        assert_eq!(s.debit(Duration::seconds(30), None).await.unwrap(), Duration::seconds(30));
        assert_eq!(s.extra_duration().await, Duration::seconds(30));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_used_corrects_total_usage() {
        let s = session(granting(60), MockCdrSink::new());
        s.debit(Duration::seconds(60), None).await.unwrap();
        s.debit(Duration::seconds(60), Some(Duration::seconds(50))).await.unwrap();
        // 50 used of the first slice, 10 carried into the second
        assert_eq!(s.total_usage().await, Duration::seconds(110));
        assert_eq!(s.extra_duration().await, Duration::zero());
    }

    /// Grants 90s at once with an action trigger posted at the 40th second.
    fn granting_with_trigger() -> MockResponder {
        let mut r = MockResponder::new();
        r.expect_max_debit().times(1).returning(|cd| {
            let mut cc = cost_for(cd, Duration::seconds(90));
            if let Some(inc) = cc.timespans[0]
                .increments
                .as_mut()
                .and_then(|i| i.comp_increment.as_mut())
            {
                inc.balance_info = Some(crate::engine::DebitInfo {
                    account_id: "cgrates.org:1001".into(),
                    ..Default::default()
                });
                inc.post_at_ids.insert("40".into(), vec!["AT_LOW".into()]);
            }
            Ok(cc)
        });
        r
    }

    #[tokio::test]
    async fn test_surplus_trigger_debit_failure_keeps_accounting() {
        let mut r = granting_with_trigger();
        let mut seq = mockall::Sequence::new();
        r.expect_debit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ChargingError::ServerError("boom".into())));
        r.expect_debit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|cd| {
                assert_eq!(cd.time_start, cd.time_end);
                assert_eq!(cd.unexe_at_ids["cgrates.org:1001"], vec!["AT_LOW".to_string()]);
                Ok(CallCost::default())
            });
        let s = session(r, MockCdrSink::new());
        s.debit(Duration::seconds(30), None).await.unwrap();
        assert_eq!(s.extra_duration().await, Duration::seconds(60));

        let err = s.debit(Duration::seconds(30), Some(Duration::seconds(30))).await.unwrap_err();
        assert_eq!(err, ChargingError::ServerError("boom".into()));
        assert_eq!(s.extra_duration().await, Duration::seconds(60));
        assert_eq!(s.total_usage().await, Duration::seconds(30));
        assert_eq!(s.last_usage().await, Duration::seconds(30));

        let got = s.debit(Duration::seconds(30), Some(Duration::seconds(30))).await.unwrap();
        assert_eq!(got, Duration::seconds(30));
        assert_eq!(s.extra_duration().await, Duration::seconds(30));
        assert_eq!(s.total_usage().await, Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_surplus_fires_zero_duration_trigger_debit() {
        let mut r = granting_with_trigger();
        r.expect_debit().times(1).returning(|cd| {
            assert!(cd.post_action_trigger);
            assert_eq!(cd.duration(), Duration::zero());
            assert!(cd.exe_at_ids.is_empty());
            assert_eq!(cd.unexe_at_ids.len(), 1);
            Ok(CallCost::default())
        });
        let s = session_with(r, MockCdrSink::new(), true);
        s.debit(Duration::seconds(30), None).await.unwrap();
        let got = s.debit(Duration::seconds(30), Some(Duration::seconds(30))).await.unwrap();
        assert_eq!(got, Duration::seconds(30));
        assert!(s.call_descriptor().await.post_action_trigger);
    }

    #[tokio::test]
    async fn test_surplus_without_triggers_skips_debit() {
        let mut r = granting(90);
        r.expect_debit().never();
        let s = session_with(r, MockCdrSink::new(), true);
        s.debit(Duration::seconds(30), None).await.unwrap();
        let got = s.debit(Duration::seconds(30), Some(Duration::seconds(30))).await.unwrap();
        assert_eq!(got, Duration::seconds(30));
        assert_eq!(s.extra_duration().await, Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_debit_error_restores_state() {
        let mut r = MockResponder::new();
        r.expect_max_debit()
            .returning(|_| Err(ChargingError::InsufficientCredit));
        let s = session(r, MockCdrSink::new());
        let err = s.debit(Duration::seconds(60), None).await.unwrap_err();
        assert_eq!(err, ChargingError::InsufficientCredit);
        let cd = s.call_descriptor().await;
        assert_eq!(cd.time_end, t0());
        assert_eq!(cd.loop_index, 0);
        assert_eq!(s.last_usage().await, Duration::zero());
    }

    #[tokio::test]
    async fn test_close_refunds_surplus() {
        let mut r = granting(60);
        r.expect_refund_increments()
            .times(1)
            .withf(|cd| {
                let refunded: i64 = cd.increments.iter().map(|i| i.compress_factor).sum();
                refunded == 55
            })
            .returning(|_| Ok(0.0));
        let s = session(r, MockCdrSink::new());
        s.debit(Duration::seconds(60), None).await.unwrap();
        s.debit(Duration::seconds(60), None).await.unwrap();
        s.close(t0() + Duration::seconds(65)).await.unwrap();

        let ccs = s.call_costs().await;
        assert_eq!(ccs.len(), 1);
        assert_eq!(ccs[0].duration(), Duration::seconds(65));
    }

    #[tokio::test]
    async fn test_close_debits_shortfall() {
        let mut r = granting(60);
        r.expect_debit()
            .times(1)
            .withf(|cd| cd.duration() == Duration::seconds(10))
            .returning(|cd| Ok(cost_for(cd, cd.duration())));
        let s = session(r, MockCdrSink::new());
        s.debit(Duration::seconds(60), None).await.unwrap();
        s.close(t0() + Duration::seconds(70)).await.unwrap();
        let ccs = s.call_costs().await;
        assert_eq!(ccs.len(), 1);
        assert_eq!(ccs[0].duration(), Duration::seconds(70));
    }

    #[tokio::test]
    async fn test_close_without_costs_is_noop() {
        let s = session(MockResponder::new(), MockCdrSink::new());
        s.close(t0() + Duration::seconds(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_operations_stores_once() {
        let mut cdrs = MockCdrSink::new();
        cdrs.expect_store_sm_cost()
            .times(1)
            .withf(|attr| attr.check_duplicate && attr.cost.usage == 60.0 && attr.cost.origin_id == "c1")
            .returning(|_| Ok(()));
        let s = session(granting(60), cdrs);
        s.debit(Duration::seconds(60), None).await.unwrap();
        s.close(t0() + Duration::seconds(60)).await.unwrap();
        s.save_operations("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_operations_duplicate_refunds_everything() {
        let mut r = granting(60);
        r.expect_refund_increments()
            .times(1)
            .withf(|cd| cd.increments.iter().map(|i| i.compress_factor).sum::<i64>() == 60)
            .returning(|_| Ok(0.0));
        let mut cdrs = MockCdrSink::new();
        cdrs.expect_store_sm_cost()
            .returning(|_| Err(ChargingError::Exists));
        let s = session(r, cdrs);
        s.debit(Duration::seconds(60), None).await.unwrap();
        s.close(t0() + Duration::seconds(60)).await.unwrap();
        s.save_operations("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_requires_connection() {
        let s = session(MockResponder::new(), MockCdrSink::new());
        let err = s.disconnect(INSUFFICIENT_FUNDS).await.unwrap_err();
        assert!(err.to_string().contains("bidirectional JSON connection"));
    }

    #[tokio::test]
    async fn test_disconnect_checks_reply() {
        let connections = Arc::new(ExternalConnections::new());
        let mut conn = MockClientConnection::new();
        conn.expect_disconnect_session()
            .withf(|a| a.reason == INSUFFICIENT_FUNDS)
            .returning(|_| Ok("NOK".into()));
        let id = connections.add(Arc::new(conn)).await;
        let ctx = SessionContext {
            responder: Arc::new(MockResponder::new()),
            cdrs: Arc::new(MockCdrSink::new()),
            connections,
            defaults: EventDefaults::default(),
            post_action_trigger: false,
        };
        let s = Session::new(
            event(),
            META_DEFAULT,
            CallDescriptor::default(),
            Some(id),
            CancellationToken::new(),
            ctx,
        );
        let err = s.disconnect(INSUFFICIENT_FUNDS).await.unwrap_err();
        assert!(err.to_string().contains("Unexpected disconnect reply: NOK"));
    }

    #[tokio::test]
    async fn test_active_session_projection() {
        let s = session(granting(60), MockCdrSink::new());
        s.debit(Duration::seconds(60), None).await.unwrap();
        let a = s.as_active_session().await;
        assert_eq!(a.origin_id, "c1");
        assert_eq!(a.run_id, META_DEFAULT);
        assert_eq!(a.usage, Duration::seconds(60));
        assert_eq!(a.loop_index, 1);
        assert_eq!(a.sm_id, SMG_ID);
        assert_eq!(a.field_as_string(ACCOUNT).as_deref(), Some("1001"));
    }

    #[tokio::test]
    async fn test_origin_update_while_state_is_busy() {
        let s = session(granting(60), MockCdrSink::new());
        s.debit(Duration::seconds(60), None).await.unwrap();
        let s = &s;
        let held = s.state.lock().await;
        let (a, ()) = tokio::join!(s.as_active_session(), async move {
            tokio::time::timeout(std::time::Duration::from_secs(1), s.set_origin_id("c2"))
                .await
                .expect("event lock free while the state is busy");
            drop(held);
        });
        assert!(a.origin_id == "c1" || a.origin_id == "c2");
        assert_eq!(s.origin_id().await, "c2");
        assert_eq!(a.usage, Duration::seconds(60));
    }
}
