// src/config.rs
use anyhow::{anyhow, Context};
use chrono::Duration;
use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::agents::diameter::DiameterAgentConfig;
use crate::cdrc::CdrcProfile;
use crate::esl::FreeSwitchConfig;
use crate::sessions::{EventDefaults, SessionManagerConfig};
use crate::utils::consts::META_PREPAID;
use crate::utils::parse_duration_with_secs;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub host: String,
    pub port: u16,
    /// `json` or `plain`.
    pub log_format: String,
    pub node_id: String,

    pub cgrates_url: String,
    pub cgrates_timeout_ms: u64,
    pub resources_enabled: bool,
    pub pubsub_enabled: bool,

    pub debit_interval: Duration,
    pub max_call_duration: Duration,
    pub session_ttl: Duration,
    pub session_ttl_last_used: Option<Duration>,
    pub session_ttl_usage: Option<Duration>,
    pub session_indexes: Vec<String>,
    pub locking_timeout: Duration,
    pub post_action_trigger: bool,

    /// The one timezone applied wherever a component has none of its own.
    pub default_timezone: String,
    pub default_tenant: String,
    pub default_category: String,
    pub default_request_type: String,

    pub freeswitch_servers: Vec<FreeSwitchServer>,
    pub freeswitch: FreeSwitchConfig,
    /// `None` keeps the Diameter agent off.
    pub diameter_agent: Option<DiameterAgentConfig>,
    pub bijson_listen: Option<String>,
    pub bijson_reply_timeout: Duration,
    pub cdrc: Vec<CdrcProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FreeSwitchServer {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Structured sections read from `CHARGING_CONFIG_PATH`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChargingFile {
    pub diameter_agent: Option<DiameterAgentConfig>,
    pub freeswitch: Option<FreeSwitchConfig>,
    pub cdrc: Vec<CdrcProfile>,
}

impl ChargingFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration out of any variable lookup.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());
        let duration = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match var(key) {
                Some(v) => parse_duration_with_secs(&v).map_err(|e| anyhow!("{}: {}", key, e)),
                None => Ok(default),
            }
        };
        let optional_duration = |key: &str| -> anyhow::Result<Option<Duration>> {
            match var(key) {
                Some(v) if !v.trim().is_empty() => parse_duration_with_secs(&v)
                    .map(Some)
                    .map_err(|e| anyhow!("{}: {}", key, e)),
                _ => Ok(None),
            }
        };
        let flag = |key: &str, default: bool| -> anyhow::Result<bool> {
            match var(key) {
                Some(v) => parse_bool(&v).ok_or_else(|| anyhow!("{}: not a boolean: {}", key, v)),
                None => Ok(default),
            }
        };

        let file = match var("CHARGING_CONFIG_PATH").filter(|p| !p.is_empty()) {
            Some(path) => ChargingFile::load(Path::new(&path))?,
            None => ChargingFile::default(),
        };

        let default_timezone = text("DEFAULT_TIMEZONE", "UTC");
        crate::utils::time::timezone(&default_timezone)
            .map_err(|e| anyhow!("DEFAULT_TIMEZONE: {}", e))?;

        let mut diameter_agent = file.diameter_agent;
        if let Some(listen) = var("DIAMETER_LISTEN").filter(|l| !l.is_empty()) {
            diameter_agent.get_or_insert_with(DiameterAgentConfig::default).listen = listen;
        }
        if let Some(da) = diameter_agent.as_mut() {
            if da.timezone.is_empty() {
                da.timezone = default_timezone.clone();
            }
        }

        let mut freeswitch = file.freeswitch.unwrap_or_default();
        if var("MIN_CALL_DURATION").is_some() {
            freeswitch.min_call_duration = duration("MIN_CALL_DURATION", Duration::zero())?;
        }

        let node_id = var("NODE_ID").filter(|n| !n.is_empty()).unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        });

        Ok(Config {
            environment: text("ENVIRONMENT", "production"),
            host: text("HOST", "0.0.0.0"),
            port: text("PORT", "9000").parse().context("PORT")?,
            log_format: text("LOG_FORMAT", "json"),
            node_id,
            cgrates_url: text("CGRATES_URL", "http://127.0.0.1:2080/jsonrpc"),
            cgrates_timeout_ms: text("CGRATES_TIMEOUT_MS", "2000")
                .parse()
                .context("CGRATES_TIMEOUT_MS")?,
            resources_enabled: flag("RESOURCES_ENABLED", false)?,
            pubsub_enabled: flag("PUBSUB_ENABLED", false)?,
            debit_interval: duration("DEBIT_INTERVAL", Duration::zero())?,
            max_call_duration: duration("MAX_CALL_DURATION", Duration::hours(3))?,
            session_ttl: duration("SESSION_TTL", Duration::zero())?,
            session_ttl_last_used: optional_duration("SESSION_TTL_LAST_USED")?,
            session_ttl_usage: optional_duration("SESSION_TTL_USAGE")?,
            session_indexes: text("SESSION_INDEXES", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            locking_timeout: duration("LOCKING_TIMEOUT", Duration::seconds(2))?,
            post_action_trigger: flag("POST_ACTION_TRIGGER", false)?,
            default_timezone,
            default_tenant: text("DEFAULT_TENANT", "cgrates.org"),
            default_category: text("DEFAULT_CATEGORY", "call"),
            default_request_type: text("DEFAULT_REQUEST_TYPE", META_PREPAID),
            freeswitch_servers: Self::parse_freeswitch_servers(&text("FREESWITCH_SERVERS", ""))?,
            freeswitch,
            diameter_agent,
            bijson_listen: var("BIJSON_LISTEN").filter(|l| !l.is_empty()),
            bijson_reply_timeout: duration("BIJSON_REPLY_TIMEOUT", Duration::seconds(2))?,
            cdrc: file.cdrc,
        })
    }

    fn parse_freeswitch_servers(servers_str: &str) -> anyhow::Result<Vec<FreeSwitchServer>> {
        if servers_str.is_empty() {
            return Ok(Vec::new());
        }

        let mut servers = Vec::new();

        for server_config in servers_str.split(',') {
            let parts: Vec<&str> = server_config.trim().splitn(3, ':').collect();
            if parts.len() == 3 {
                servers.push(FreeSwitchServer {
                    host: parts[0].to_string(),
                    port: parts[1]
                        .parse()
                        .with_context(|| format!("FREESWITCH_SERVERS port in {}", server_config))?,
                    password: parts[2].to_string(),
                });
            }
        }

        Ok(servers)
    }

    pub fn session_manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            debit_interval: self.debit_interval,
            max_call_duration: self.max_call_duration,
            session_ttl: self.session_ttl,
            session_ttl_last_used: self.session_ttl_last_used,
            session_ttl_usage: self.session_ttl_usage,
            session_indexes: self.session_indexes.clone(),
            locking_timeout: self
                .locking_timeout
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(2)),
        }
    }

    pub fn event_defaults(&self) -> EventDefaults {
        EventDefaults {
            tenant: self.default_tenant.clone(),
            category: self.default_category.clone(),
            request_type: self.default_request_type.clone(),
            timezone: self.default_timezone.clone(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("NODE_ID", "node1")]).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.node_id, "node1");
        assert_eq!(cfg.default_timezone, "UTC");
        assert!(cfg.diameter_agent.is_none());
        assert!(cfg.bijson_listen.is_none());
        assert!(cfg.cdrc.is_empty());
        let sm = cfg.session_manager_config();
        assert!(sm.debit_interval.is_zero());
        assert_eq!(sm.max_call_duration, Duration::hours(3));
        assert_eq!(cfg.event_defaults().request_type, META_PREPAID);
    }

    #[test]
    fn test_go_durations_and_indexes() {
        let cfg = config(&[
            ("DEBIT_INTERVAL", "30s"),
            ("MAX_CALL_DURATION", "1h30m"),
            ("SESSION_TTL", "90"),
            ("SESSION_TTL_USAGE", "250ms"),
            ("SESSION_INDEXES", "Account, Destination,"),
            ("POST_ACTION_TRIGGER", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.debit_interval, Duration::seconds(30));
        assert_eq!(cfg.max_call_duration, Duration::minutes(90));
        assert_eq!(cfg.session_ttl, Duration::seconds(90));
        assert_eq!(cfg.session_ttl_usage, Some(Duration::milliseconds(250)));
        assert_eq!(cfg.session_ttl_last_used, None);
        assert_eq!(cfg.session_indexes, vec!["Account", "Destination"]);
        assert!(cfg.post_action_trigger);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("DEBIT_INTERVAL", "soon")]).is_err());
        assert!(config(&[("PORT", "http")]).is_err());
        assert!(config(&[("DEFAULT_TIMEZONE", "Mars/Olympus")]).is_err());
        assert!(config(&[("PUBSUB_ENABLED", "maybe")]).is_err());
    }

    #[test]
    fn test_parse_freeswitch_servers() {
        let servers =
            Config::parse_freeswitch_servers("10.0.0.1:8021:ClueCon, 10.0.0.2:8021:pa:ss,broken").unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].host, "10.0.0.1");
        assert_eq!(servers[0].port, 8021);
        assert_eq!(servers[1].password, "pa:ss");
        assert!(Config::parse_freeswitch_servers("h:port:pw").is_err());
    }

    #[test]
    fn test_charging_file_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "diameter_agent": {{"origin_host": "DA1"}},
                "freeswitch": {{"create_cdr": true}},
                "cdrc": [{{"id": "c1", "cdr_format": "csv"}}]
            }}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();
        let cfg = config(&[
            ("CHARGING_CONFIG_PATH", path.as_str()),
            ("DIAMETER_LISTEN", "0.0.0.0:3869"),
            ("DEFAULT_TIMEZONE", "Europe/Berlin"),
            ("MIN_CALL_DURATION", "5s"),
        ])
        .unwrap();
        let da = cfg.diameter_agent.unwrap();
        assert_eq!(da.origin_host, "DA1");
        assert_eq!(da.listen, "0.0.0.0:3869");
        assert_eq!(da.timezone, "Europe/Berlin");
        assert!(cfg.freeswitch.create_cdr);
        assert_eq!(cfg.freeswitch.min_call_duration, Duration::seconds(5));
        assert_eq!(cfg.cdrc.len(), 1);
        assert_eq!(cfg.cdrc[0].id, "c1");
    }
}
