// src/esl/client.rs
use rand::Rng;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::connection::EslConnection;
use super::event_handler::FsSessionManager;
use super::FreeSwitchConfig;
use crate::cgrates::ResourceLimiter;
use crate::config::FreeSwitchServer;
use crate::error::ChargingError;
use crate::sessions::SessionManager;

/// One reconnecting event socket client per configured FreeSWITCH.
pub struct FreeSwitchCluster {
    servers: Vec<FreeSwitchServer>,
    cfg: Arc<FreeSwitchConfig>,
    sessions: Arc<SessionManager>,
    resources: Option<Arc<dyn ResourceLimiter>>,
    /// Handlers of the currently connected servers.
    live: Arc<RwLock<Vec<Arc<FsSessionManager>>>>,
    shutdown: CancellationToken,
}

impl FreeSwitchCluster {
    pub fn new(
        servers: Vec<FreeSwitchServer>,
        cfg: Arc<FreeSwitchConfig>,
        sessions: Arc<SessionManager>,
        resources: Option<Arc<dyn ResourceLimiter>>,
    ) -> Self {
        Self {
            servers,
            cfg,
            sessions,
            resources,
            live: Arc::new(RwLock::new(Vec::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn start(&self) {
        for server in &self.servers {
            let client = FreeSwitchClient {
                server: server.clone(),
                cfg: self.cfg.clone(),
                sessions: self.sessions.clone(),
                resources: self.resources.clone(),
                live: self.live.clone(),
                shutdown: self.shutdown.clone(),
            };
            tokio::spawn(client.run());
        }
    }

    /// Hangs up the calls of every connected server and stops reconnecting.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let live = self.live.read().await.clone();
        for handler in live {
            handler.shutdown().await;
        }
    }
}

struct FreeSwitchClient {
    server: FreeSwitchServer,
    cfg: Arc<FreeSwitchConfig>,
    sessions: Arc<SessionManager>,
    resources: Option<Arc<dyn ResourceLimiter>>,
    live: Arc<RwLock<Vec<Arc<FsSessionManager>>>>,
    shutdown: CancellationToken,
}

impl FreeSwitchClient {
    async fn run(self) {
        let server_id = format!("{}:{}", self.server.host, self.server.port);
        let delay = self
            .cfg
            .reconnect_delay
            .to_std()
            .unwrap_or(Duration::from_secs(5));

        while !self.shutdown.is_cancelled() {
            match self.connect_and_listen(&server_id).await {
                Ok(()) => info!("FreeSWITCH ESL connection closed: {}", server_id),
                Err(e) => error!("❌ FreeSWITCH ESL error for {}: {}", server_id, e),
            }
            if self.shutdown.is_cancelled() {
                break;
            }
            // spread reconnects of a restarted switch farm
            let wait = delay + Duration::from_millis(rand::thread_rng().gen_range(0..500));
            warn!("Reconnecting to {} in {:?}...", server_id, wait);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
    }

    async fn connect_and_listen(&self, server_id: &str) -> Result<(), ChargingError> {
        let (connection, mut events) = EslConnection::connect(
            &self.server.host,
            self.server.port,
            &self.server.password,
            &self.cfg.events(),
        )
        .await?;
        info!("✅ Connected and authenticated to FreeSWITCH: {}", server_id);

        let handler = FsSessionManager::new(
            self.cfg.clone(),
            self.sessions.clone(),
            self.resources.clone(),
            connection.clone(),
        );
        handler.register().await;
        self.live.write().await.push(handler.clone());

        let closed = connection.closed();
        let sync = self.spawn_sync(handler.clone(), closed.clone());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => {
                        let handler = handler.clone();
                        tokio::spawn(async move { handler.handle_event(&event).await });
                    }
                    None => break,
                },
            }
        }

        closed.cancel();
        if let Some(task) = sync {
            task.abort();
        }
        if !self.shutdown.is_cancelled() {
            handler.unregister().await;
            self.live
                .write()
                .await
                .retain(|h| !Arc::ptr_eq(h, &handler));
        }
        Ok(())
    }

    fn spawn_sync(
        &self,
        handler: Arc<FsSessionManager>,
        closed: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.cfg.channel_sync_interval.to_std().ok()?;
        if interval.is_zero() {
            return None;
        }
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = sleep(interval) => handler.sync_sessions().await,
                }
            }
        }))
    }
}
