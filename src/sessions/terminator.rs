// src/sessions/terminator.rs
//! Per session id idle watchdog.

use chrono::Duration;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// TTL parameters in force when the watchdog fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlSettings {
    pub ttl: Duration,
    pub last_used: Option<Duration>,
    pub usage: Option<Duration>,
}

enum Command {
    Reset {
        ttl: Option<Duration>,
        last_used: Option<Duration>,
        usage: Option<Duration>,
    },
    Stop,
}

pub struct Terminator {
    tx: mpsc::UnboundedSender<Command>,
}

fn deadline(ttl: Duration) -> Instant {
    Instant::now() + ttl.to_std().unwrap_or_default()
}

impl Terminator {
    /// Starts the watchdog; `on_expire` runs once if no reset arrives within the TTL.
    pub fn spawn<F, Fut>(session_id: String, settings: TtlSettings, on_expire: F) -> Self
    where
        F: FnOnce(TtlSettings) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut settings = settings;
            let mut at = deadline(settings.ttl);
            loop {
                tokio::select! {
                    _ = sleep_until(at) => {
                        debug!("⏰ Session TTL expired: {}", session_id);
                        on_expire(settings).await;
                        return;
                    }
                    cmd = rx.recv() => match cmd {
                        Some(Command::Reset { ttl, last_used, usage }) => {
                            if let Some(ttl) = ttl.filter(|t| !t.is_zero()) {
                                settings.ttl = ttl;
                            }
                            if last_used.is_some() {
                                settings.last_used = last_used;
                            }
                            if usage.is_some() {
                                settings.usage = usage;
                            }
                            at = deadline(settings.ttl);
                        }
                        Some(Command::Stop) | None => return,
                    }
                }
            }
        });
        Self { tx }
    }

    /// Restarts the countdown, overriding whichever settings are given.
    pub fn reset(&self, ttl: Option<Duration>, last_used: Option<Duration>, usage: Option<Duration>) {
        let _ = self.tx.send(Command::Reset {
            ttl,
            last_used,
            usage,
        });
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}
