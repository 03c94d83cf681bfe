// src/cdrc/unpaired.rs
//! Pairing of flatstore INVITE/BYE halves across the files of a folder.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::ChargingError;
use crate::utils::time::parse_time;

pub const UNPAIRED_SUFFIX: &str = ".unpaired";

const INVITE: &str = "INVITE";
const BYE: &str = "BYE";

/// One half of a flatstore call: `method|from_tag|to_tag|callid|code|reason|time|...`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpairedRecord {
    pub method: String,
    pub origin_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub values: Vec<String>,
}

impl UnpairedRecord {
    pub fn new(values: Vec<String>, tz: &str) -> Result<Self, ChargingError> {
        if values.len() < 7 {
            return Err(ChargingError::ParserError(
                "MISSING_IE: flatstore record too short".to_string(),
            ));
        }
        Ok(Self {
            method: values[0].clone(),
            origin_id: format!("{}{}{}", values[3], values[1], values[2]),
            timestamp: parse_time(&values[6], tz)?,
            values,
        })
    }
}

/// Joins an INVITE with its BYE: status comes from the BYE, dynamic
/// columns are overwritten when the BYE has them and the call duration in
/// seconds is appended as last column.
pub fn pair_to_record(a: &UnpairedRecord, b: &UnpairedRecord) -> Result<Vec<String>, ChargingError> {
    if a.method == b.method {
        return Err(ChargingError::ParserError("MISMATCH_METHOD".to_string()));
    }
    let (invite, bye) = if a.method == INVITE { (a, b) } else { (b, a) };
    if invite.method != INVITE || bye.method != BYE {
        return Err(ChargingError::ParserError(format!(
            "unexpected methods {}/{}",
            invite.method, bye.method
        )));
    }
    if invite.values.len() != bye.values.len() {
        return Err(ChargingError::ParserError(
            "INCONSISTENT_VALUES_LENGTH".to_string(),
        ));
    }
    let mut record = invite.values.clone();
    for (idx, value) in record.iter_mut().enumerate() {
        match idx {
            0..=3 | 6 => {}
            4 | 5 => *value = bye.values[idx].clone(),
            _ if !bye.values[idx].is_empty() => *value = bye.values[idx].clone(),
            _ => {}
        }
    }
    let duration = match (bye.timestamp, invite.timestamp) {
        (Some(end), Some(start)) => end - start,
        _ => Duration::zero(),
    };
    record.push(format_seconds(duration));
    Ok(record)
}

fn format_seconds(d: Duration) -> String {
    let ns = d.num_nanoseconds().unwrap_or_default();
    if ns % 1_000_000_000 == 0 {
        (ns / 1_000_000_000).to_string()
    } else {
        format!("{}", ns as f64 / 1e9)
    }
}

type FileRecords = HashMap<String, HashMap<String, UnpairedRecord>>;

/// Halves waiting for their pair, keyed by file then origin id. Halves left
/// alone past the TTL are appended to `<out_dir>/<file>.unpaired`.
#[derive(Clone)]
pub struct UnpairedRecordsCache {
    ttl: Duration,
    out_dir: PathBuf,
    separator: char,
    records: Arc<Mutex<FileRecords>>,
}

impl UnpairedRecordsCache {
    pub fn new(ttl: Duration, out_dir: impl Into<PathBuf>, separator: char) -> Self {
        Self {
            ttl,
            out_dir: out_dir.into(),
            separator,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Removes and returns the other half of `origin_id` with its file name.
    pub async fn take(&self, origin_id: &str) -> Option<(String, UnpairedRecord)> {
        let mut records = self.records.lock().await;
        let file = records
            .iter()
            .find(|(_, recs)| recs.contains_key(origin_id))
            .map(|(f, _)| f.clone())?;
        let recs = records.get_mut(&file)?;
        let rec = recs.remove(origin_id)?;
        if recs.is_empty() {
            records.remove(&file);
        }
        Some((file, rec))
    }

    pub async fn cache(&self, file: &str, record: UnpairedRecord) {
        let origin_id = record.origin_id.clone();
        self.records
            .lock()
            .await
            .entry(file.to_string())
            .or_default()
            .insert(origin_id.clone(), record);

        let Ok(ttl) = self.ttl.to_std() else {
            return;
        };
        if ttl.is_zero() {
            return;
        }
        let cache = self.clone();
        let file = file.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = cache.expire(&file, &origin_id).await {
                error!("❌ Failed dumping unpaired record {}: {}", origin_id, e);
            }
        });
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.values().map(HashMap::len).sum()
    }

    async fn expire(&self, file: &str, origin_id: &str) -> Result<(), ChargingError> {
        let record = {
            let mut records = self.records.lock().await;
            let Some(recs) = records.get_mut(file) else {
                return Ok(());
            };
            let Some(rec) = recs.remove(origin_id) else {
                return Ok(());
            };
            if recs.is_empty() {
                records.remove(file);
            }
            rec
        };
        let path = self.out_dir.join(format!("{}{}", file, UNPAIRED_SUFFIX));
        let mut line = record.values.join(&self.separator.to_string());
        line.push('\n');
        let mut out = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        out.write_all(line.as_bytes()).await?;
        info!("⚠️ Unpaired record {} dumped to {}", origin_id, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&str]) -> UnpairedRecord {
        UnpairedRecord::new(fields.iter().map(|s| s.to_string()).collect(), "UTC").unwrap()
    }

    fn invite() -> UnpairedRecord {
        rec(&["INVITE", "2daec40c", "548625ac", "dd0c4c617a9919d29a6175cdff223a9e@0:0:0:0:0:0:0:0", "200", "OK", "1436454408", "*prepaid", "1001", "1002", "", "3401:2069362475"])
    }

    fn bye() -> UnpairedRecord {
        rec(&["BYE", "2daec40c", "548625ac", "dd0c4c617a9919d29a6175cdff223a9e@0:0:0:0:0:0:0:0", "200", "OK", "1436454410", "", "", "", "", "3401:2069362475"])
    }

    #[test]
    fn test_new_unpaired_record() {
        let r = invite();
        assert_eq!(r.method, "INVITE");
        assert_eq!(
            r.origin_id,
            "dd0c4c617a9919d29a6175cdff223a9e@0:0:0:0:0:0:0:02daec40c548625ac"
        );
        assert_eq!(r.timestamp.unwrap().timestamp(), 1436454408);
        assert!(UnpairedRecord::new(vec!["INVITE".to_string()], "UTC").is_err());
    }

    #[test]
    fn test_pair_to_record() {
        let paired = pair_to_record(&bye(), &invite()).unwrap();
        assert_eq!(paired.len(), 13);
        assert_eq!(paired[0], "INVITE");
        assert_eq!(paired[7], "*prepaid");
        assert_eq!(paired[12], "2");
        assert!(pair_to_record(&invite(), &invite()).is_err());
    }

    #[tokio::test]
    async fn test_cache_take() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UnpairedRecordsCache::new(Duration::zero(), dir.path(), '|');
        cache.cache("acc_1.log", invite()).await;
        assert_eq!(cache.len().await, 1);
        let (file, half) = cache.take(&bye().origin_id).await.unwrap();
        assert_eq!(file, "acc_1.log");
        assert_eq!(half.method, "INVITE");
        assert_eq!(cache.len().await, 0);
        assert!(cache.take(&bye().origin_id).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_dumped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UnpairedRecordsCache::new(Duration::milliseconds(50), dir.path(), '|');
        cache.cache("acc_2.log", invite()).await;
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(cache.len().await, 0);
        let dumped = std::fs::read_to_string(dir.path().join("acc_2.log.unpaired")).unwrap();
        assert!(dumped.starts_with("INVITE|2daec40c|548625ac|"));
    }
}
