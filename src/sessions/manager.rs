// src/sessions/manager.rs
//! Session manager: registry of session groups, field index, TTL terminators
//! and the lifecycle operations exposed to the protocol adapters.

use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::active::ActiveSession;
use super::event::GenericEvent;
use super::index::SessionIndex;
use super::session::{Session, SessionContext};
use super::terminator::{Terminator, TtlSettings};
use crate::engine::{AttrStoreSmCost, CallCost, SmCost};
use crate::error::ChargingError;
use crate::guardian::GUARDIAN;
use crate::utils::consts::*;
use crate::utils::time::duration_secs;

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Zero disables the background debit loop.
    pub debit_interval: Duration,
    pub max_call_duration: Duration,
    /// Zero disables TTL terminators.
    pub session_ttl: Duration,
    pub session_ttl_last_used: Option<Duration>,
    pub session_ttl_usage: Option<Duration>,
    pub session_indexes: Vec<String>,
    pub locking_timeout: std::time::Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            debit_interval: Duration::zero(),
            max_call_duration: Duration::hours(3),
            session_ttl: Duration::zero(),
            session_ttl_last_used: None,
            session_ttl_usage: None,
            session_indexes: Vec::new(),
            locking_timeout: std::time::Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Vec<Arc<Session>>>,
    terminators: HashMap<String, Terminator>,
}

pub struct SessionManager {
    cfg: SessionManagerConfig,
    ctx: SessionContext,
    registry: RwLock<Registry>,
    index: RwLock<SessionIndex>,
    me: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(cfg: SessionManagerConfig, ctx: SessionContext) -> Arc<Self> {
        let index = SessionIndex::new(cfg.session_indexes.clone());
        Arc::new_cyclic(|me| Self {
            cfg,
            ctx,
            registry: RwLock::new(Registry::default()),
            index: RwLock::new(index),
            me: me.clone(),
        })
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.cfg
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn timezone(&self) -> &str {
        &self.ctx.defaults.timezone
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub async fn get_sessions(&self, session_id: &str) -> Vec<Arc<Session>> {
        self.registry
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.registry.read().await.sessions.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    /// Start events of the sessions owned by one client connection.
    pub async fn connection_sessions(&self, conn_id: &str) -> Vec<GenericEvent> {
        let firsts: Vec<Arc<Session>> = self
            .registry
            .read()
            .await
            .sessions
            .values()
            .filter_map(|group| group.first())
            .filter(|s| s.conn_id() == Some(conn_id))
            .cloned()
            .collect();
        let mut out = Vec::with_capacity(firsts.len());
        for s in firsts {
            out.push(s.event_start().await);
        }
        out
    }

    async fn session_ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.registry
            .read()
            .await
            .sessions
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect()
    }

    async fn index_session(&self, session_id: &str, session: Arc<Session>) {
        let projection = session.as_active_session().await;
        let event = session.event_start().await;
        {
            let mut reg = self.registry.write().await;
            reg.sessions
                .entry(session_id.to_string())
                .or_default()
                .push(session);
            if !self.cfg.session_ttl.is_zero() && !reg.terminators.contains_key(session_id) {
                let settings = TtlSettings {
                    ttl: event
                        .session_ttl()
                        .ok()
                        .flatten()
                        .filter(|t| *t > Duration::zero())
                        .unwrap_or(self.cfg.session_ttl),
                    last_used: event
                        .session_ttl_last_used()
                        .ok()
                        .flatten()
                        .or(self.cfg.session_ttl_last_used),
                    usage: event
                        .session_ttl_usage()
                        .ok()
                        .flatten()
                        .or(self.cfg.session_ttl_usage),
                };
                let terminator = self.spawn_terminator(session_id, settings);
                reg.terminators.insert(session_id.to_string(), terminator);
            }
        }
        self.index
            .write()
            .await
            .index(session_id, |field| projection.indexed_value(field));
    }

    /// Drops the group and its terminator; false when unknown.
    async fn unindex_session(&self, session_id: &str) -> bool {
        {
            let mut reg = self.registry.write().await;
            if reg.sessions.remove(session_id).is_none() {
                return false;
            }
            if let Some(t) = reg.terminators.remove(session_id) {
                t.stop();
            }
        }
        self.index.write().await.unindex(session_id);
        true
    }

    fn spawn_terminator(&self, session_id: &str, settings: TtlSettings) -> Terminator {
        let me = self.me.clone();
        let id = session_id.to_string();
        Terminator::spawn(session_id.to_string(), settings, move |s| async move {
            if let Some(manager) = me.upgrade() {
                manager.ttl_terminate(&id, s).await;
            }
        })
    }

    async fn reset_terminator(
        &self,
        session_id: &str,
        ttl: Option<Duration>,
        last_used: Option<Duration>,
        usage: Option<Duration>,
    ) {
        if let Some(t) = self.registry.read().await.terminators.get(session_id) {
            t.reset(ttl, last_used, usage);
        }
    }

    async fn ttl_terminate(&self, session_id: &str, ttl: TtlSettings) {
        let sessions = self.get_sessions(session_id).await;
        let Some(first) = sessions.first().cloned() else {
            return;
        };
        warn!("⏰ Session {} idle for {:?}, terminating", session_id, ttl.ttl);
        let debit_usage = ttl.usage.unwrap_or(ttl.ttl);
        for s in &sessions {
            if let Err(e) = s.debit(debit_usage, ttl.last_used).await {
                warn!("⚠️ TTL debit failed on {}: {}", session_id, e);
            }
        }
        let total = first.total_usage().await;
        if let Err(e) = self.session_end(session_id, total).await {
            error!("❌ Could not end expired session {}: {}", session_id, e);
        }
        let mut cdr = first.event_start().await.as_cdr(&self.ctx.defaults);
        cdr.usage = total;
        if let Err(e) = self.ctx.cdrs.process_cdr(&cdr).await {
            error!("❌ Could not post CDR of expired session {}: {}", session_id, e);
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    async fn session_start(&self, event: &GenericEvent, conn_id: Option<String>) -> Result<(), ChargingError> {
        let session_id = event.origin_id();
        GUARDIAN
            .guard(&session_id, self.cfg.locking_timeout, async {
                let runs = self
                    .ctx
                    .responder
                    .get_session_runs(&event.as_cdr(&self.ctx.defaults))
                    .await?;
                if runs.is_empty() {
                    debug!("No session runs for {}", session_id);
                    return Ok(());
                }
                let stop = CancellationToken::new();
                for run in runs {
                    let session = Arc::new(Session::new(
                        event.clone(),
                        run.run_id(),
                        run.call_descriptor.clone(),
                        conn_id.clone(),
                        stop.clone(),
                        self.ctx.clone(),
                    ));
                    info!("📞 Starting session {} run {}", session_id, run.run_id());
                    self.index_session(&session_id, session.clone()).await;
                    if !self.cfg.debit_interval.is_zero() {
                        tokio::spawn(session.debit_loop(self.cfg.debit_interval));
                    }
                }
                Ok::<_, ChargingError>(())
            })
            .await?
    }

    async fn session_end(&self, session_id: &str, usage: Duration) -> Result<(), ChargingError> {
        GUARDIAN
            .guard(session_id, self.cfg.locking_timeout, async {
                let sessions = self.get_sessions(session_id).await;
                if sessions.is_empty() || !self.unindex_session(session_id).await {
                    return;
                }
                for (idx, s) in sessions.iter().enumerate() {
                    s.set_total_usage(usage).await;
                    if idx == 0 {
                        s.stop_token().cancel();
                    }
                    let event = s.event_start().await;
                    let start = match event.answer_time(self.timezone()) {
                        Ok(Some(t)) => t,
                        other => {
                            error!(
                                "❌ No answer time for session {} run {}: {:?}",
                                session_id,
                                s.run_id(),
                                other
                            );
                            s.call_descriptor().await.time_start
                        }
                    };
                    if let Err(e) = s.close(start + usage).await {
                        error!("❌ Could not close session {} run {}: {}", session_id, s.run_id(), e);
                    }
                    if let Err(e) = s.save_operations(session_id).await {
                        error!("❌ Could not save session {} run {}: {}", session_id, s.run_id(), e);
                    }
                }
                info!("🛑 Session {} ended, usage {:?}", session_id, usage);
            })
            .await
    }

    async fn session_relocate(&self, session_id: &str, initial_id: &str) -> Result<(), ChargingError> {
        GUARDIAN
            .guard(initial_id, self.cfg.locking_timeout, async {
                if session_id.is_empty() || initial_id.is_empty() {
                    return Err(ChargingError::MandatoryIeMissing);
                }
                if !self.get_sessions(session_id).await.is_empty() {
                    return Ok(());
                }
                let sessions = self.get_sessions(initial_id).await;
                if sessions.is_empty() {
                    return Err(ChargingError::NotFound);
                }
                for (i, s) in sessions.into_iter().enumerate() {
                    s.set_origin_id(session_id).await;
                    if i == 0 {
                        self.unindex_session(initial_id).await;
                    }
                    self.index_session(session_id, s).await;
                }
                info!("🔀 Session {} relocated to {}", initial_id, session_id);
                Ok(())
            })
            .await?
    }

    /// Relocates when the event carries an initial id, starting fresh if nothing was there.
    async fn relocate_if_needed(
        &self,
        event: &GenericEvent,
        conn_id: &Option<String>,
    ) -> Result<(), ChargingError> {
        if !event.has(INITIAL_ORIGIN_ID) {
            return Ok(());
        }
        match self
            .session_relocate(&event.origin_id(), &event.initial_origin_id())
            .await
        {
            Err(ChargingError::NotFound) => self.session_start(event, conn_id.clone()).await,
            other => other,
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Maximum usage in seconds the rating engine allows, `-1` for unlimited.
    #[instrument(skip(self, event), fields(origin_id = %event.origin_id()))]
    pub async fn max_usage(&self, mut event: GenericEvent) -> Result<f64, ChargingError> {
        event.set(EVENT_NAME, AUTHORIZATION);
        self.ctx
            .responder
            .get_derived_max_session_time(&event.as_cdr(&self.ctx.defaults))
            .await
    }

    #[instrument(skip(self, event), fields(origin_id = %event.origin_id()))]
    pub async fn lcr_suppliers(&self, mut event: GenericEvent) -> Result<Vec<String>, ChargingError> {
        event.set(EVENT_NAME, LCR);
        let mut cd = event.as_lcr_descriptor(&self.ctx.defaults)?;
        cd.unique_id = event.unique_id(self.timezone());
        let mut lcr = self.ctx.responder.get_lcr(&cd).await?;
        if lcr.has_errors() {
            lcr.log_errors();
            return Err(ChargingError::ServerError("LCR_COMPUTE_ERROR".into()));
        }
        lcr.sort();
        lcr.suppliers()
    }

    #[instrument(skip(self, event, conn_id), fields(origin_id = %event.origin_id()))]
    pub async fn initiate_session(
        &self,
        event: GenericEvent,
        conn_id: Option<String>,
    ) -> Result<Duration, ChargingError> {
        let session_id = event.origin_id();
        if session_id.is_empty() {
            return Err(ChargingError::MandatoryIeMissing);
        }
        if let Err(e) = self.session_start(&event, conn_id.clone()).await {
            let _ = self.session_end(&session_id, Duration::zero()).await;
            return Err(e);
        }
        if !self.cfg.debit_interval.is_zero() {
            if self.get_sessions(&session_id).await.is_empty() {
                return Err(ChargingError::ServerError("no active sessions".into()));
            }
            return Ok(self.cfg.debit_interval);
        }
        match self.update_session(event, conn_id).await {
            Ok(d) if d.is_zero() => {
                self.session_end(&session_id, Duration::zero()).await?;
                Ok(d)
            }
            Ok(d) => Ok(d),
            Err(e) => {
                let _ = self.session_end(&session_id, Duration::zero()).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, event, conn_id), fields(origin_id = %event.origin_id()))]
    pub async fn update_session(
        &self,
        event: GenericEvent,
        conn_id: Option<String>,
    ) -> Result<Duration, ChargingError> {
        if !self.cfg.debit_interval.is_zero() {
            return Err(ChargingError::ActiveDebitLoop);
        }
        let session_id = event.origin_id();
        if session_id.is_empty() {
            return Err(ChargingError::MandatoryIeMissing);
        }
        self.relocate_if_needed(&event, &conn_id).await?;
        self.reset_terminator(
            &session_id,
            event.session_ttl()?,
            event.session_ttl_last_used()?,
            event.session_ttl_usage()?,
        )
        .await;
        let last_used = event.last_used()?;
        let max_usage = event.max_usage(self.cfg.max_call_duration)?;

        GUARDIAN
            .guard(&session_id, self.cfg.locking_timeout, async {
                let sessions = self.get_sessions(&session_id).await;
                if sessions.is_empty() {
                    error!("❌ Update with no active sessions for {}", session_id);
                    return Err(ChargingError::ServerError("no active sessions".into()));
                }
                let mut granted = max_usage;
                for s in sessions {
                    let d = s.debit(max_usage, last_used).await?;
                    if d < granted {
                        granted = d;
                    }
                }
                Ok(granted)
            })
            .await?
    }

    #[instrument(skip(self, event, conn_id), fields(origin_id = %event.origin_id()))]
    pub async fn terminate_session(
        &self,
        event: GenericEvent,
        conn_id: Option<String>,
    ) -> Result<(), ChargingError> {
        match self.relocate_if_needed(&event, &conn_id).await {
            Ok(()) | Err(ChargingError::MandatoryIeMissing) => {}
            Err(e) => return Err(e),
        }
        let session_ids = match event.origin_id_prefix() {
            Some(prefix) if prefix.is_empty() => return Err(ChargingError::MandatoryIeMissing),
            Some(prefix) => self.session_ids_with_prefix(&prefix).await,
            None => vec![event.origin_id()],
        };
        let usage = event.usage()?;
        let last_used = match usage {
            Some(_) => Duration::zero(),
            None => event.last_used()?.ok_or(ChargingError::MandatoryIeMissing)?,
        };

        let mut found = false;
        let mut last_err = None;
        for session_id in session_ids {
            let sessions = self.get_sessions(&session_id).await;
            let Some(first) = sessions.first() else {
                continue;
            };
            found = true;
            let final_usage = match usage {
                Some(u) => u,
                None => first.total_usage().await - first.last_usage().await + last_used,
            };
            if let Err(e) = self.session_end(&session_id, final_usage).await {
                last_err = Some(e);
            }
        }
        if !found {
            return Err(ChargingError::NoActiveSession);
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One shot charging of a non session event.
    #[instrument(skip(self, event), fields(origin_id = %event.origin_id()))]
    pub async fn charge_event(&self, event: GenericEvent) -> Result<Duration, ChargingError> {
        let mut runs = self
            .ctx
            .responder
            .get_session_runs(&event.as_cdr(&self.ctx.defaults))
            .await?;
        if runs.is_empty() {
            return Ok(Duration::zero());
        }

        let mut max_dur: Option<Duration> = None;
        let mut failure = None;
        for run in runs.iter_mut() {
            let cc = match self.ctx.responder.max_debit(&run.call_descriptor).await {
                Ok(cc) => cc,
                Err(e) => {
                    error!("❌ Could not debit run {}: {}", run.run_id(), e);
                    failure = Some(e);
                    break;
                }
            };
            let cc_dur = cc.duration();
            run.call_costs.push(cc);
            if cc_dur.is_zero() {
                failure = Some(ChargingError::InsufficientCredit);
                break;
            }
            max_dur = Some(max_dur.map_or(cc_dur, |m| m.min(cc_dur)));
        }

        if let Some(err) = failure {
            for run in runs.iter_mut() {
                let Some(mut cc) = merged(std::mem::take(&mut run.call_costs)) else {
                    continue;
                };
                cc.decompress();
                let increments: Vec<_> = cc
                    .timespans
                    .iter()
                    .filter_map(|ts| ts.comp_increment().cloned())
                    .collect();
                if increments.is_empty() {
                    continue;
                }
                let mut cd = cc.create_call_descriptor();
                cd.increments = increments;
                cd.unique_id = run.call_descriptor.unique_id.clone();
                cd.run_id = run.call_descriptor.run_id.clone();
                self.ctx.responder.refund_increments(&cd).await?;
            }
            return Err(err);
        }

        let mut with_errors = false;
        for run in runs.iter_mut() {
            let Some(cc) = merged(std::mem::take(&mut run.call_costs)) else {
                continue;
            };
            let attr = AttrStoreSmCost {
                cost: SmCost {
                    unique_id: event.unique_id(self.timezone()),
                    cost_source: SESSION_MANAGER_SOURCE.to_string(),
                    run_id: run.run_id().to_string(),
                    origin_host: event.origin_host(),
                    origin_id: event.origin_id(),
                    usage: duration_secs(cc.duration()),
                    cost_details: cc,
                },
                check_duplicate: true,
            };
            match self.ctx.cdrs.store_sm_cost(&attr).await {
                Ok(()) | Err(ChargingError::Exists) => {}
                Err(e) => {
                    with_errors = true;
                    error!("❌ Could not store cost of run {}: {}", run.run_id(), e);
                }
            }
        }
        if with_errors {
            return Err(ChargingError::PartiallyExecuted);
        }
        Ok(max_dur.unwrap_or_else(Duration::zero))
    }

    pub async fn process_cdr(&self, event: GenericEvent) -> Result<(), ChargingError> {
        self.ctx
            .cdrs
            .process_cdr(&event.as_cdr(&self.ctx.defaults))
            .await
    }

    /// Sessions matching every filter, resolved through the index first.
    pub async fn active_sessions(&self, filters: &HashMap<String, String>) -> Vec<ActiveSession> {
        let (candidates, checked) = self.index.read().await.matching(filters);
        let groups: Vec<Arc<Session>> = {
            let reg = self.registry.read().await;
            match &candidates {
                None => reg.sessions.values().flatten().cloned().collect(),
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| reg.sessions.get(id))
                    .flatten()
                    .cloned()
                    .collect(),
            }
        };
        let remaining: Vec<(&String, &String)> = filters
            .iter()
            .filter(|(k, _)| !checked.contains(k.as_str()))
            .collect();

        let mut out = Vec::new();
        for s in groups {
            let a = s.as_active_session().await;
            if remaining.iter().all(|(k, v)| a.indexed_value(k) == **v) {
                out.push(a);
            }
        }
        out
    }

    pub async fn active_sessions_count(&self, filters: &HashMap<String, String>) -> usize {
        self.active_sessions(filters).await.len()
    }

    /// Session ids currently indexed under `field` = `value`.
    pub async fn indexed_ids(&self, field: &str, value: &str) -> HashSet<String> {
        let filters = HashMap::from([(field.to_string(), value.to_string())]);
        self.index.read().await.matching(&filters).0.unwrap_or_default()
    }

    /// Ends every session with the maximum call duration.
    pub async fn shutdown(&self) {
        let ids = self.session_ids().await;
        info!("🛑 Shutting down session manager, {} active sessions", ids.len());
        for id in ids {
            if let Err(e) = self.session_end(&id, self.cfg.max_call_duration).await {
                error!("❌ Could not end session {} on shutdown: {}", id, e);
            }
        }
        debug!("Session manager stopped at {}", Utc::now());
    }
}

fn merged(mut ccs: Vec<CallCost>) -> Option<CallCost> {
    if ccs.is_empty() {
        return None;
    }
    let mut first = ccs.remove(0);
    for cc in ccs {
        first.merge(cc);
    }
    Some(first)
}
