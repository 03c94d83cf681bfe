// src/cdrc/partial.rs
//! Partial CDRs: records of one call arriving in pieces are held until the
//! closing piece shows up or the TTL runs out.

use chrono::Duration;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cgrates::CdrSink;
use crate::engine::Cdr;
use crate::error::ChargingError;
use crate::utils::FieldTemplate;

pub const PARTIAL_SUFFIX: &str = ".partial";

pub const META_DUMP_TO_FILE: &str = "*dump_to_file";
pub const META_POST_CDR: &str = "*post_cdr";

/// Pieces of one call, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PartialCdrRecord {
    pub cdrs: Vec<Cdr>,
    /// Arrival counter of the last piece; a timer only fires for the piece
    /// it was armed for.
    generation: u64,
}

impl PartialCdrRecord {
    /// Folds the pieces into one CDR: later non empty values win, usages
    /// add up, extra fields are merged.
    pub fn merge(&self) -> Option<Cdr> {
        let (first, rest) = self.cdrs.split_first()?;
        let mut merged = first.clone();
        for cdr in rest {
            for (dst, src) in [
                (&mut merged.origin_host, &cdr.origin_host),
                (&mut merged.source, &cdr.source),
                (&mut merged.tor, &cdr.tor),
                (&mut merged.request_type, &cdr.request_type),
                (&mut merged.direction, &cdr.direction),
                (&mut merged.tenant, &cdr.tenant),
                (&mut merged.category, &cdr.category),
                (&mut merged.account, &cdr.account),
                (&mut merged.subject, &cdr.subject),
                (&mut merged.destination, &cdr.destination),
                (&mut merged.supplier, &cdr.supplier),
                (&mut merged.disconnect_cause, &cdr.disconnect_cause),
            ] {
                if !src.is_empty() {
                    *dst = src.clone();
                }
            }
            if cdr.setup_time.is_some() && merged.setup_time.is_none() {
                merged.setup_time = cdr.setup_time;
            }
            if cdr.answer_time.is_some() && merged.answer_time.is_none() {
                merged.answer_time = cdr.answer_time;
            }
            if !cdr.pdd.is_zero() {
                merged.pdd = cdr.pdd;
            }
            merged.usage = merged.usage + cdr.usage;
            if cdr.cost != crate::decimal::Dec::MINUS_ONE {
                merged.cost = cdr.cost;
            }
            for (k, v) in &cdr.extra_fields {
                if !v.is_empty() {
                    merged.extra_fields.insert(k.clone(), v.clone());
                }
            }
        }
        merged.partial = false;
        merged.compute_cgrid();
        Some(merged)
    }
}

#[derive(Clone)]
pub struct PartialRecordsCache {
    ttl: Duration,
    expiry_action: String,
    out_dir: PathBuf,
    separator: char,
    dump_fields: Arc<Vec<FieldTemplate>>,
    cdrs: Arc<dyn CdrSink>,
    records: Arc<Mutex<HashMap<String, PartialCdrRecord>>>,
}

impl PartialRecordsCache {
    pub fn new(
        ttl: Duration,
        expiry_action: &str,
        out_dir: impl Into<PathBuf>,
        separator: char,
        dump_fields: Vec<FieldTemplate>,
        cdrs: Arc<dyn CdrSink>,
    ) -> Result<Self, ChargingError> {
        if expiry_action != META_DUMP_TO_FILE && expiry_action != META_POST_CDR {
            return Err(ChargingError::Config(format!(
                "unsupported partial cache expiry action: {}",
                expiry_action
            )));
        }
        Ok(Self {
            ttl,
            expiry_action: expiry_action.to_string(),
            out_dir: out_dir.into(),
            separator,
            dump_fields: Arc::new(dump_fields),
            cdrs,
            records: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Adds a piece. Returns the merged CDR once a non partial piece closes
    /// the call, `None` while it stays open.
    pub async fn merge_partial(&self, cdr: Cdr) -> Result<Option<Cdr>, ChargingError> {
        let origin_id = cdr.origin_id.clone();
        if origin_id.is_empty() {
            return Err(ChargingError::MandatoryIeMissing);
        }
        let closing = !cdr.partial;
        let generation = {
            let mut records = self.records.lock().await;
            let entry = records.entry(origin_id.clone()).or_default();
            entry.cdrs.push(cdr);
            entry.generation += 1;
            if closing {
                let done = records.remove(&origin_id);
                return Ok(done.and_then(|r| r.merge()));
            }
            entry.generation
        };
        self.arm_expiry(origin_id, generation);
        Ok(None)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    fn arm_expiry(&self, origin_id: String, generation: u64) {
        let Ok(ttl) = self.ttl.to_std() else {
            return;
        };
        if ttl.is_zero() {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = cache.expire(&origin_id, generation).await {
                error!("❌ Failed expiring partial record {}: {}", origin_id, e);
            }
        });
    }

    async fn expire(&self, origin_id: &str, generation: u64) -> Result<(), ChargingError> {
        let record = {
            let mut records = self.records.lock().await;
            match records.get(origin_id) {
                Some(r) if r.generation == generation => records.remove(origin_id),
                _ => None,
            }
        };
        let Some(record) = record else {
            return Ok(());
        };
        match self.expiry_action.as_str() {
            META_POST_CDR => {
                let Some(cdr) = record.merge() else {
                    return Ok(());
                };
                self.cdrs.process_cdr(&cdr).await?;
                info!("✅ Expired partial CDR {} posted", origin_id);
            }
            _ => {
                let path = self.out_dir.join(format!("{}{}", origin_id, PARTIAL_SUFFIX));
                let mut content = String::new();
                for cdr in &record.cdrs {
                    content.push_str(&self.dump_line(cdr));
                    content.push('\n');
                }
                let mut out = tokio::fs::File::create(&path).await?;
                out.write_all(content.as_bytes()).await?;
                warn!("⚠️ Expired partial CDR {} dumped to {}", origin_id, path.display());
            }
        }
        Ok(())
    }

    fn dump_line(&self, cdr: &Cdr) -> String {
        let source = |id: &str| Some(cdr.field_as_string(id));
        self.dump_fields
            .iter()
            .map(|tpl| tpl.compose(&source).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&self.separator.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgrates::MockCdrSink;
    use crate::decimal::Dec;
    use crate::utils::consts::*;

    fn piece(usage: i64, partial: bool) -> Cdr {
        Cdr {
            origin_id: "call1".to_string(),
            account: "1001".to_string(),
            usage: Duration::seconds(usage),
            partial,
            ..Default::default()
        }
    }

    fn cache(ttl: Duration, action: &str, sink: MockCdrSink) -> PartialRecordsCache {
        let dir = std::env::temp_dir();
        PartialRecordsCache::new(
            ttl,
            action,
            dir,
            ',',
            vec![
                FieldTemplate::composed(ACCID, ACCID).unwrap(),
                FieldTemplate::composed(USAGE, USAGE).unwrap(),
            ],
            Arc::new(sink),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_pieces() {
        let mut last = piece(20, false);
        last.destination = "1002".to_string();
        last.cost = Dec::new(12, 1);
        last.extra_fields.insert("disconnect".to_string(), "16".to_string());
        let rec = PartialCdrRecord {
            cdrs: vec![piece(10, true), last],
            generation: 2,
        };
        let merged = rec.merge().unwrap();
        assert_eq!(merged.usage, Duration::seconds(30));
        assert_eq!(merged.account, "1001");
        assert_eq!(merged.destination, "1002");
        assert_eq!(merged.cost, Dec::new(12, 1));
        assert_eq!(merged.extra_fields["disconnect"], "16");
        assert!(!merged.partial);
        assert!(PartialCdrRecord::default().merge().is_none());
    }

    #[tokio::test]
    async fn test_merge_until_closed() {
        let c = cache(Duration::zero(), META_DUMP_TO_FILE, MockCdrSink::new());
        assert!(c.merge_partial(piece(10, true)).await.unwrap().is_none());
        assert!(c.merge_partial(piece(5, true)).await.unwrap().is_none());
        assert_eq!(c.len().await, 1);
        let done = c.merge_partial(piece(1, false)).await.unwrap().unwrap();
        assert_eq!(done.usage, Duration::seconds(16));
        assert_eq!(c.len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_expiry_action() {
        let res = PartialRecordsCache::new(
            Duration::zero(),
            "*drop",
            std::env::temp_dir(),
            ',',
            Vec::new(),
            Arc::new(MockCdrSink::new()),
        );
        assert!(matches!(res, Err(ChargingError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_posts_cdr() {
        let mut sink = MockCdrSink::new();
        sink.expect_process_cdr()
            .withf(|cdr| cdr.origin_id == "call1" && cdr.usage == Duration::seconds(15))
            .times(1)
            .returning(|_| Ok(()));
        let c = cache(Duration::seconds(10), META_POST_CDR, sink);
        c.merge_partial(piece(10, true)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        // a new piece rearms the timer
        c.merge_partial(piece(5, true)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(7)).await;
        assert_eq!(c.len().await, 1);
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(c.len().await, 0);
    }

    #[tokio::test]
    async fn test_expiry_dumps_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let c = PartialRecordsCache::new(
            Duration::milliseconds(50),
            META_DUMP_TO_FILE,
            dir.path(),
            ',',
            vec![
                FieldTemplate::composed(ACCID, ACCID).unwrap(),
                FieldTemplate::composed(ACCOUNT, ACCOUNT).unwrap(),
            ],
            Arc::new(MockCdrSink::new()),
        )
        .unwrap();
        c.merge_partial(piece(10, true)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let dumped = std::fs::read_to_string(dir.path().join("call1.partial")).unwrap();
        assert_eq!(dumped, "call1,1001\n");
    }
}
