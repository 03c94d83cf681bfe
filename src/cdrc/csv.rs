// src/cdrc/csv.rs
//! Delimited files: plain CSV, FreeSWITCH CSV, Kamailio/OpenSIPS flatstore
//! and partial CSV.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::fields::ConvertOpts;
use super::unpaired::{pair_to_record, UnpairedRecord};
use super::{CdrcContext, RecordsProcessor};
use crate::engine::Cdr;
use crate::error::ChargingError;

pub struct CsvRecordsProcessor {
    ctx: Arc<CdrcContext>,
    file_name: String,
    records: std::vec::IntoIter<Result<Vec<String>, ChargingError>>,
    processed: u64,
}

impl CsvRecordsProcessor {
    pub fn new(ctx: Arc<CdrcContext>, file_name: &str, content: &str) -> Self {
        let mut delimiter = [0u8; 4];
        let delimiter = ctx.dflt().separator().encode_utf8(&mut delimiter).as_bytes()[0];
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(content.as_bytes());
        let records: Vec<_> = reader
            .records()
            .map(|r| {
                r.map(|rec| rec.iter().map(str::to_string).collect())
                    .map_err(|e| ChargingError::ParserError(e.to_string()))
            })
            .collect();
        Self {
            ctx,
            file_name: file_name.to_string(),
            records: records.into_iter(),
            processed: 0,
        }
    }

    /// Completes a flatstore half out of the cache. `None` while the other
    /// half is still missing.
    async fn pair_flatstore(&self, mut record: Vec<String>) -> Result<Option<Vec<String>>, ChargingError> {
        let prefix = &self.ctx.dflt().failed_calls_prefix;
        if !prefix.is_empty() && self.file_name.starts_with(prefix.as_str()) {
            // failed calls carry no BYE
            record.push("0".to_string());
            return Ok(Some(record));
        }
        let half = UnpairedRecord::new(record, self.ctx.timezone())?;
        match self.ctx.unpaired.take(&half.origin_id).await {
            Some((file, cached)) => {
                debug!("Paired {} with half from {}", half.origin_id, file);
                pair_to_record(&cached, &half).map(Some)
            }
            None => {
                self.ctx.unpaired.cache(&self.file_name, half).await;
                Ok(None)
            }
        }
    }

    async fn process_record(&self, record: Vec<String>) -> Result<Vec<Cdr>, ChargingError> {
        let flatstore = self.ctx.dflt().is_flatstore();
        let record = if flatstore {
            match self.pair_flatstore(record).await? {
                Some(r) => r,
                None => return Ok(Vec::new()),
            }
        } else {
            record
        };
        let opts = ConvertOpts {
            flatstore_len: flatstore.then_some(record.len()),
            strict_filters: true,
        };
        let source = |id: &str| index_value(&record, id);
        let pending = self.ctx.convert(&source, opts)?;
        self.ctx.complete(pending).await
    }
}

/// Field ids of delimited records are column indexes.
fn index_value(record: &[String], id: &str) -> Option<String> {
    id.trim().parse::<usize>().ok().and_then(|i| record.get(i)).cloned()
}

#[async_trait]
impl RecordsProcessor for CsvRecordsProcessor {
    async fn process_next_record(&mut self) -> Option<Result<Vec<Cdr>, ChargingError>> {
        let record = self.records.next()?;
        self.processed += 1;
        Some(match record {
            Ok(record) => self.process_record(record).await,
            Err(e) => Err(e),
        })
    }

    fn processed_records(&self) -> u64 {
        self.processed
    }
}
