// src/esl/mod.rs
//! FreeSWITCH event socket adapter: park authorization, answer/hangup
//! driving sessions, channel reconciliation.

pub mod client;
pub mod connection;
pub mod event;
pub mod event_handler;

pub use client::FreeSwitchCluster;
pub use connection::{EslCommands, EslConnection};
pub use event::EslEvent;
pub use event_handler::FsSessionManager;

use chrono::Duration;
use serde::Deserialize;

use crate::utils::time::duration_ns;

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> Duration {
    Duration::minutes(5)
}

fn default_max_wait_connection() -> Duration {
    Duration::seconds(2)
}

fn default_reconnect_delay() -> Duration {
    Duration::seconds(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct FreeSwitchConfig {
    #[serde(default = "default_true")]
    pub subscribe_park: bool,
    #[serde(default)]
    pub create_cdr: bool,
    /// Channel variables copied into the session events.
    #[serde(default)]
    pub extra_fields: Vec<String>,
    /// Calls allowed less than this are refused at park.
    #[serde(default = "Duration::zero", with = "duration_ns")]
    pub min_call_duration: Duration,
    #[serde(default = "Duration::zero", with = "duration_ns")]
    pub min_dur_low_balance: Duration,
    #[serde(default)]
    pub low_balance_ann_file: String,
    #[serde(default)]
    pub empty_balance_context: String,
    #[serde(default)]
    pub empty_balance_ann_file: String,
    /// Zero disables the `show channels` reconciliation.
    #[serde(default = "default_sync_interval", with = "duration_ns")]
    pub channel_sync_interval: Duration,
    #[serde(default = "default_max_wait_connection", with = "duration_ns")]
    pub max_wait_connection: Duration,
    #[serde(default = "default_reconnect_delay", with = "duration_ns")]
    pub reconnect_delay: Duration,
}

impl Default for FreeSwitchConfig {
    fn default() -> Self {
        Self {
            subscribe_park: true,
            create_cdr: false,
            extra_fields: Vec::new(),
            min_call_duration: Duration::zero(),
            min_dur_low_balance: Duration::zero(),
            low_balance_ann_file: String::new(),
            empty_balance_context: String::new(),
            empty_balance_ann_file: String::new(),
            channel_sync_interval: default_sync_interval(),
            max_wait_connection: default_max_wait_connection(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl FreeSwitchConfig {
    /// Events to subscribe on every connection.
    pub fn events(&self) -> Vec<&'static str> {
        let mut events = vec![event::CHANNEL_ANSWER, event::CHANNEL_HANGUP_COMPLETE];
        if self.subscribe_park {
            events.push(event::CHANNEL_PARK);
        }
        events
    }
}
