// src/esl/event_handler.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use super::connection::EslCommands;
use super::event::{
    fs_array, parse_channels, EslEvent, CHANNEL_ANSWER, CHANNEL_HANGUP_COMPLETE, CHANNEL_PARK,
};
use super::FreeSwitchConfig;
use crate::cgrates::{ResourceLimiter, ResourceUsageArgs};
use crate::error::ChargingError;
use crate::sessions::{AttrDisconnectSession, ClientConnection, GenericEvent, SessionManager};
use crate::utils::consts::*;

const CGR_NOTIFY: &str = "cgr_notify";
const CGR_SUPPLIERS: &str = "cgr_suppliers";

/// Drives sessions from the events of one FreeSWITCH connection and
/// executes the disconnects the core requests on it.
pub struct FsSessionManager {
    cfg: Arc<FreeSwitchConfig>,
    sessions: Arc<SessionManager>,
    resources: Option<Arc<dyn ResourceLimiter>>,
    conn: Arc<dyn EslCommands>,
    conn_id: OnceCell<String>,
}

/// FreeSWITCH notify strings carry a sign prefix.
fn notify_string(reason: &str) -> String {
    if reason.starts_with('+') || reason.starts_with('-') {
        reason.to_string()
    } else {
        format!("-{}", reason)
    }
}

impl FsSessionManager {
    pub fn new(
        cfg: Arc<FreeSwitchConfig>,
        sessions: Arc<SessionManager>,
        resources: Option<Arc<dyn ResourceLimiter>>,
        conn: Arc<dyn EslCommands>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            sessions,
            resources,
            conn,
            conn_id: OnceCell::new(),
        })
    }

    /// Registers as a client connection so the core can disconnect calls.
    pub async fn register(self: &Arc<Self>) -> String {
        let id = self
            .sessions
            .context()
            .connections
            .add(self.clone() as Arc<dyn ClientConnection>)
            .await;
        let _ = self.conn_id.set(id.clone());
        id
    }

    pub async fn unregister(&self) {
        if let Some(id) = self.conn_id.get() {
            self.sessions.context().connections.remove(id).await;
        }
    }

    pub fn conn_id(&self) -> Option<&str> {
        self.conn_id.get().map(String::as_str)
    }

    pub async fn handle_event(&self, event: &EslEvent) {
        let Some(name) = event.event_name() else {
            return;
        };
        match name.as_str() {
            CHANNEL_PARK => self.on_channel_park(event).await,
            CHANNEL_ANSWER => self.on_channel_answer(event).await,
            CHANNEL_HANGUP_COMPLETE => self.on_channel_hangup(event).await,
            other => debug!("Ignoring FreeSWITCH event {}", other),
        }
    }

    fn generic(&self, event: &EslEvent) -> GenericEvent {
        event.as_generic_event(&self.cfg.extra_fields)
    }

    async fn api(&self, cmd: &str) -> Result<String, ChargingError> {
        self.conn.api(cmd).await.map_err(|e| {
            error!("❌ FreeSWITCH command '{}' failed: {}", cmd, e);
            e
        })
    }

    async fn set_var(&self, uuid: &str, name: &str, value: &str) -> Result<String, ChargingError> {
        self.api(&format!("uuid_setvar {} {} {}", uuid, name, value)).await
    }

    /// Notifies the dialplan and sends the call back to its destination.
    async fn unpark_call(&self, uuid: &str, dest: &str, notify: &str) {
        let _ = self.set_var(uuid, CGR_NOTIFY, notify).await;
        let _ = self.api(&format!("uuid_transfer {} {}", uuid, dest)).await;
    }

    async fn on_channel_park(&self, fs: &EslEvent) {
        if fs.ignore_park() {
            return;
        }
        let uuid = fs.unique_id();
        let dest = fs.call_dest_nr();
        let ev = self.generic(fs);
        info!("📞 CHANNEL_PARK: {} → {}", uuid, dest);

        if fs.request_type() != META_NONE {
            match self.sessions.max_usage(ev.clone()).await {
                Err(e) => {
                    error!("❌ Could not get max session time for {}: {}", uuid, e);
                    self.unpark_call(uuid, dest, FS_SYSTEM_ERROR).await;
                    return;
                }
                Ok(max) if max >= 0.0 => {
                    let min = self.cfg.min_call_duration.num_milliseconds() as f64 / 1000.0;
                    if max <= min {
                        warn!("⚠️ Not enough credit to route {}", uuid);
                        self.unpark_call(uuid, dest, FS_INSUFFICIENT_FUNDS).await;
                        return;
                    }
                    let _ = self
                        .set_var(
                            uuid,
                            "execute_on_answer",
                            &format!("sched_hangup +{} alloted_timeout", max as i64),
                        )
                        .await;
                    self.warn_low_balance(uuid, max).await;
                }
                Ok(_) => {}
            }
        }

        if fs.compute_lcr() {
            let supps = match self.sessions.lcr_suppliers(ev.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    error!("❌ LCR_ERROR for {}: {}", uuid, e);
                    self.unpark_call(uuid, dest, FS_SYSTEM_ERROR).await;
                    return;
                }
            };
            if self.set_var(uuid, CGR_SUPPLIERS, &fs_array(&supps)).await.is_err() {
                self.unpark_call(uuid, dest, FS_SYSTEM_ERROR).await;
                return;
            }
        }

        if let Some(rls) = &self.resources {
            let args = ResourceUsageArgs {
                usage_id: uuid.to_string(),
                event: ev.0.clone(),
                units: 1.0,
            };
            match rls.initiate_resource_usage(&args).await {
                Ok(()) => {}
                Err(ChargingError::ResourceUnavailable) => {
                    self.unpark_call(uuid, dest, &notify_string(&ChargingError::ResourceUnavailable.to_string()))
                        .await;
                    return;
                }
                Err(e) => {
                    error!("❌ RLs API error for {}: {}", uuid, e);
                    self.unpark_call(uuid, dest, FS_SYSTEM_ERROR).await;
                    return;
                }
            }
        }
        self.unpark_call(uuid, dest, FS_AUTH_OK).await;
    }

    /// Plays the low balance announcement when the call is short on credit.
    async fn warn_low_balance(&self, uuid: &str, max_secs: f64) {
        if self.cfg.low_balance_ann_file.is_empty() || self.cfg.min_dur_low_balance.is_zero() {
            return;
        }
        if max_secs > self.cfg.min_dur_low_balance.num_seconds() as f64 {
            return;
        }
        let _ = self
            .api(&format!("uuid_broadcast {} {} aleg", uuid, self.cfg.low_balance_ann_file))
            .await;
    }

    async fn on_channel_answer(&self, fs: &EslEvent) {
        if fs.request_type() == META_NONE {
            return;
        }
        let ev = self.generic(fs);
        if fs.missing_parameter() {
            warn!("⚠️ Answer of {} misses charging parameters", fs.unique_id());
            self.hangup(&ev, FS_MISSING_PARAMETER).await;
            return;
        }
        info!("📞 CHANNEL_ANSWER: {}", fs.unique_id());
        match self
            .sessions
            .initiate_session(ev.clone(), self.conn_id().map(str::to_string))
            .await
        {
            Ok(d) if d.is_zero() => self.hangup(&ev, FS_INSUFFICIENT_FUNDS).await,
            Ok(_) => {}
            Err(e) => {
                error!("❌ Could not start session {}: {}", fs.unique_id(), e);
                let reason = match e {
                    ChargingError::InsufficientCredit => FS_INSUFFICIENT_FUNDS,
                    _ => FS_SYSTEM_ERROR,
                };
                self.hangup(&ev, reason).await;
            }
        }
    }

    async fn hangup(&self, ev: &GenericEvent, reason: &str) {
        let args = AttrDisconnectSession {
            event_start: ev.clone(),
            reason: reason.to_string(),
        };
        if let Err(e) = self.disconnect_session(&args).await {
            error!("❌ Could not disconnect {}: {}", ev.origin_id(), e);
        }
    }

    async fn on_channel_hangup(&self, fs: &EslEvent) {
        if fs.request_type() == META_NONE {
            return;
        }
        let uuid = fs.unique_id();
        let ev = self.generic(fs);
        info!("📴 CHANNEL_HANGUP_COMPLETE: {}", uuid);

        // the answer may still be in flight
        let mut active = false;
        for i in 0..2u64 {
            if !self.sessions.get_sessions(uuid).await.is_empty() {
                active = true;
                break;
            }
            sleep(Duration::from_secs(i + 1)).await;
        }
        if active {
            if let Err(e) = self
                .sessions
                .terminate_session(ev.clone(), self.conn_id().map(str::to_string))
                .await
            {
                error!("❌ Error removing session {}: {}", uuid, e);
            }
        }
        if self.cfg.create_cdr {
            if let Err(e) = self.sessions.process_cdr(ev.clone()).await {
                error!("❌ Failed processing CDR of {}: {}", uuid, e);
            }
        }
        if let Some(rls) = &self.resources {
            let args = ResourceUsageArgs {
                usage_id: uuid.to_string(),
                event: ev.0,
                units: 1.0,
            };
            if let Err(e) = rls.terminate_resource_usage(&args).await {
                error!("❌ RLs API error for {}: {}", uuid, e);
            }
        }
    }

    /// Closes sessions whose channel FreeSWITCH no longer reports.
    pub async fn sync_sessions(&self) {
        let Some(conn_id) = self.conn_id() else {
            return;
        };
        let wait = self
            .cfg
            .max_wait_connection
            .to_std()
            .unwrap_or(Duration::from_secs(2));
        let channels = match timeout(wait, self.conn.api("show channels")).await {
            // connection gone: every session of it is stale
            Err(_) => Vec::new(),
            Ok(Err(e)) => {
                error!("❌ Error on syncing active calls: {}", e);
                return;
            }
            Ok(Ok(output)) => {
                let chans = parse_channels(&output);
                if chans.is_empty() && output.trim_start().starts_with("uuid,direction") {
                    error!("❌ Syncing active calls, cannot parse: {}", output);
                    return;
                }
                chans
            }
        };

        let tz = self.sessions.context().defaults.timezone.as_str();
        for mut ev in self.sessions.connection_sessions(conn_id).await {
            let uuid = ev.origin_id();
            let still_active = channels.iter().any(|c| {
                let call_uuid = c.get("call_uuid").map(String::as_str).unwrap_or_default();
                call_uuid == uuid
                    || (call_uuid.is_empty() && c.get("uuid").map(String::as_str) == Some(uuid.as_str()))
            });
            if still_active {
                continue;
            }
            warn!("⚠️ Sync active channels, stale session detected: {}", uuid);
            let usage = stale_usage(&ev, tz, Utc::now());
            ev.set(USAGE, format!("{}ms", usage.num_milliseconds()));
            if let Err(e) = self.sessions.terminate_session(ev, Some(conn_id.to_string())).await {
                error!("❌ Error on removing stale session {}: {}", uuid, e);
            }
        }
    }

    /// Hangs up every prepaid call and waits briefly for the hangups.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down all sessions on connection {:?}", self.conn_id());
        if let Err(e) = self.conn.api("hupall MANAGER_REQUEST cgr_reqtype *prepaid").await {
            error!("❌ Error on calls shutdown: {}", e);
        }
        let Some(conn_id) = self.conn_id() else {
            return;
        };
        for _ in 0..20 {
            if self.sessions.connection_sessions(conn_id).await.is_empty() {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }
}

#[async_trait]
impl ClientConnection for FsSessionManager {
    async fn disconnect_session(&self, args: &AttrDisconnectSession) -> Result<String, ChargingError> {
        let uuid = args.event_start.origin_id();
        let dest = args.event_start.destination();
        let notify = notify_string(&args.reason);
        self.set_var(&uuid, CGR_NOTIFY, &notify).await?;
        if notify == FS_INSUFFICIENT_FUNDS {
            if !self.cfg.empty_balance_context.is_empty() {
                self.api(&format!(
                    "uuid_transfer {} {} XML {}",
                    uuid, dest, self.cfg.empty_balance_context
                ))
                .await?;
                return Ok(OK.to_string());
            }
            if !self.cfg.empty_balance_ann_file.is_empty() {
                self.api(&format!(
                    "uuid_broadcast {} playback!manager_request::{} aleg",
                    uuid, self.cfg.empty_balance_ann_file
                ))
                .await?;
                return Ok(OK.to_string());
            }
        }
        self.conn
            .sendmsg(
                &uuid,
                vec![
                    ("call-command".to_string(), "hangup".to_string()),
                    ("hangup-cause".to_string(), "MANAGER_REQUEST".to_string()),
                ],
            )
            .await?;
        Ok(OK.to_string())
    }
}

/// Time from answer, read in `tz`, to `now`.
fn stale_usage(ev: &GenericEvent, tz: &str, now: DateTime<Utc>) -> chrono::Duration {
    let answered = ev.answer_time(tz).ok().flatten().unwrap_or(now);
    (now - answered).max(chrono::Duration::zero())
}
