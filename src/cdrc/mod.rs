// src/cdrc/mod.rs
//! CDR file mediation: watches an input folder, converts every record of
//! the files dropped there into CDRs, posts them to the CDR store and moves
//! the file to the output folder.

pub mod csv;
pub mod fields;
pub mod fwv;
pub mod partial;
pub mod unpaired;
pub mod xml;

use async_trait::async_trait;
use chrono::Duration;
use futures::future::join_all;
use notify::{event::ModifyKind, Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use self::csv::CsvRecordsProcessor;
use self::fields::{apply_http_fields, filters_pass, record_to_cdr, ConvertOpts, PendingCdr};
use self::fwv::FwvRecordsProcessor;
use self::partial::{PartialRecordsCache, META_DUMP_TO_FILE};
use self::unpaired::UnpairedRecordsCache;
use self::xml::XmlRecordsProcessor;
use crate::cgrates::CdrSink;
use crate::engine::Cdr;
use crate::error::ChargingError;
use crate::utils::rsr::RsrField;
use crate::utils::template::deserialize_rsr_fields;
use crate::utils::time::duration_ns;
use crate::utils::{FieldSource, FieldTemplate};

pub const CSV: &str = "csv";
pub const FS_CSV: &str = "freeswitch_csv";
pub const KAM_FLATSTORE: &str = "kamailio_flatstore";
pub const OSIPS_FLATSTORE: &str = "opensips_flatstore";
pub const PARTIAL_CSV: &str = "partial_csv";
pub const FWV: &str = "fwv";
pub const XML: &str = "xml";

/// One mediation profile. Profiles sharing an input folder are served by
/// the same [`Cdrc`]; the first one decides the folder wide settings
/// (format, delays, caches).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CdrcProfile {
    pub id: String,
    pub enabled: bool,
    pub dry_run: bool,
    pub cdr_format: String,
    pub field_separator: String,
    pub timezone: String,
    /// Zero watches the folder; anything else polls it at this interval.
    #[serde(with = "duration_ns")]
    pub run_delay: Duration,
    /// Files processed at once, zero for no limit.
    pub max_open_files: usize,
    pub data_usage_multiply_factor: f64,
    pub cdr_in_dir: PathBuf,
    pub cdr_out_dir: PathBuf,
    pub failed_calls_prefix: String,
    /// `>` separated element path of the records inside XML files.
    pub cdr_path: String,
    pub cdr_source_id: String,
    #[serde(deserialize_with = "deserialize_rsr_fields")]
    pub cdr_filter: Vec<RsrField>,
    pub continue_on_success: bool,
    /// TTL of unpaired and partial records.
    #[serde(with = "duration_ns")]
    pub partial_record_cache: Duration,
    pub partial_cache_expiry_action: String,
    pub header_fields: Vec<FieldTemplate>,
    pub content_fields: Vec<FieldTemplate>,
    pub trailer_fields: Vec<FieldTemplate>,
    pub cache_dump_fields: Vec<FieldTemplate>,
}

impl Default for CdrcProfile {
    fn default() -> Self {
        Self {
            id: "*default".to_string(),
            enabled: true,
            dry_run: false,
            cdr_format: CSV.to_string(),
            field_separator: ",".to_string(),
            timezone: String::new(),
            run_delay: Duration::zero(),
            max_open_files: 1024,
            data_usage_multiply_factor: 1024.0,
            cdr_in_dir: PathBuf::from("/var/spool/charging/cdrc/in"),
            cdr_out_dir: PathBuf::from("/var/spool/charging/cdrc/out"),
            failed_calls_prefix: "missed_calls".to_string(),
            cdr_path: String::new(),
            cdr_source_id: "freeswitch_csv".to_string(),
            cdr_filter: Vec::new(),
            continue_on_success: false,
            partial_record_cache: Duration::seconds(10),
            partial_cache_expiry_action: META_DUMP_TO_FILE.to_string(),
            header_fields: Vec::new(),
            content_fields: Vec::new(),
            trailer_fields: Vec::new(),
            cache_dump_fields: Vec::new(),
        }
    }
}

impl CdrcProfile {
    pub fn separator(&self) -> char {
        self.field_separator.chars().next().unwrap_or(',')
    }

    pub fn is_flatstore(&self) -> bool {
        self.cdr_format == KAM_FLATSTORE || self.cdr_format == OSIPS_FLATSTORE
    }
}

/// Splits the enabled profiles into per folder groups, keeping their order.
pub fn group_by_in_dir(profiles: Vec<CdrcProfile>) -> Vec<Vec<CdrcProfile>> {
    let mut groups: Vec<Vec<CdrcProfile>> = Vec::new();
    for profile in profiles.into_iter().filter(|p| p.enabled) {
        match groups.iter_mut().find(|g| g[0].cdr_in_dir == profile.cdr_in_dir) {
            Some(group) => group.push(profile),
            None => groups.push(vec![profile]),
        }
    }
    groups
}

/// Understands one file format and yields the CDRs of its records.
#[async_trait]
pub trait RecordsProcessor: Send {
    /// CDRs of the next record; `None` once the file is exhausted.
    async fn process_next_record(&mut self) -> Option<Result<Vec<Cdr>, ChargingError>>;

    fn processed_records(&self) -> u64;
}

/// State shared by the files of one folder.
pub struct CdrcContext {
    profiles: Vec<CdrcProfile>,
    timezone: String,
    http: reqwest::Client,
    unpaired: UnpairedRecordsCache,
    partial: PartialRecordsCache,
}

impl CdrcContext {
    pub fn new(
        profiles: Vec<CdrcProfile>,
        default_timezone: &str,
        cdrs: Arc<dyn CdrSink>,
    ) -> Result<Self, ChargingError> {
        let dflt = profiles
            .first()
            .cloned()
            .ok_or_else(|| ChargingError::Config("cdrc without profiles".to_string()))?;
        let timezone = if dflt.timezone.is_empty() {
            default_timezone.to_string()
        } else {
            dflt.timezone.clone()
        };
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ChargingError::Config(e.to_string()))?;
        let unpaired = UnpairedRecordsCache::new(
            dflt.partial_record_cache,
            dflt.cdr_out_dir.clone(),
            dflt.separator(),
        );
        let partial = PartialRecordsCache::new(
            dflt.partial_record_cache,
            &dflt.partial_cache_expiry_action,
            dflt.cdr_out_dir.clone(),
            dflt.separator(),
            dflt.cache_dump_fields.clone(),
            cdrs,
        )?;
        Ok(Self {
            profiles,
            timezone,
            http,
            unpaired,
            partial,
        })
    }

    pub fn dflt(&self) -> &CdrcProfile {
        &self.profiles[0]
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Runs every matching profile over one record. Stops after the first
    /// successful profile unless it asks to continue.
    pub fn convert(&self, source: &dyn FieldSource, opts: ConvertOpts) -> Result<Vec<PendingCdr>, ChargingError> {
        let mut out = Vec::new();
        for profile in &self.profiles {
            if !filters_pass(&profile.cdr_filter, source, opts.strict_filters)? {
                continue;
            }
            let pending = record_to_cdr(source, &profile.content_fields, profile, &self.timezone, opts)
                .map_err(|e| ChargingError::ParserError(format!("failed converting to CDR: {}", e)))?;
            out.push(pending);
            if !profile.continue_on_success {
                break;
            }
        }
        Ok(out)
    }

    /// Resolves the HTTP fields and, for partial files, folds the pieces.
    pub async fn complete(&self, pending: Vec<PendingCdr>) -> Result<Vec<Cdr>, ChargingError> {
        let mut out = Vec::with_capacity(pending.len());
        for p in pending {
            let cdr = apply_http_fields(p, &self.http, &self.timezone).await?;
            if self.dflt().cdr_format != PARTIAL_CSV {
                out.push(cdr);
                continue;
            }
            if let Some(merged) = self.partial.merge_partial(cdr).await? {
                out.push(merged);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileStats {
    pub processed: u64,
    pub posted: usize,
}

/// Mediation of one input folder.
pub struct Cdrc {
    ctx: Arc<CdrcContext>,
    cdrs: Arc<dyn CdrSink>,
    open_files: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl Cdrc {
    pub fn new(
        profiles: Vec<CdrcProfile>,
        default_timezone: &str,
        cdrs: Arc<dyn CdrSink>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, ChargingError> {
        let ctx = CdrcContext::new(profiles, default_timezone, cdrs.clone())?;
        let dflt = ctx.dflt();
        for dir in [&dflt.cdr_in_dir, &dflt.cdr_out_dir] {
            if !dir.is_dir() {
                return Err(ChargingError::Config(format!(
                    "nonexistent folder: {}",
                    dir.display()
                )));
            }
        }
        let open_files = match dflt.max_open_files {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Ok(Arc::new(Self {
            ctx: Arc::new(ctx),
            cdrs,
            open_files,
            shutdown,
        }))
    }

    pub fn in_dir(&self) -> &Path {
        &self.ctx.dflt().cdr_in_dir
    }

    /// Processes what is already in the folder, then either watches it or
    /// polls it every `run_delay` until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ChargingError> {
        let delay = self.ctx.dflt().run_delay;
        if delay.is_zero() {
            if let Err(e) = self.process_dir().await {
                warn!("Could not process existing CDR files: {}", e);
            }
            return self.watch().await;
        }
        let delay = delay.to_std().unwrap_or(std::time::Duration::from_secs(1));
        loop {
            if let Err(e) = self.process_dir().await {
                error!("❌ Processing {} failed: {}", self.in_dir().display(), e);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("🛑 Shutting down CDRC on path {}", self.in_dir().display());
        Ok(())
    }

    async fn watch(self: &Arc<Self>) -> Result<(), ChargingError> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| ChargingError::Io(e.to_string()))?;
        watcher
            .watch(self.in_dir(), RecursiveMode::NonRecursive)
            .map_err(|e| ChargingError::Io(e.to_string()))?;
        info!("✅ Monitoring {} for file moves", self.in_dir().display());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                ev = rx.recv() => match ev {
                    Some(Ok(event)) => self.on_fs_event(event),
                    Some(Err(e)) => error!("❌ Folder watch error: {}", e),
                    None => break,
                },
            }
        }
        info!("🛑 Shutting down CDRC on path {}", self.in_dir().display());
        Ok(())
    }

    fn on_fs_event(self: &Arc<Self>, event: Event) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
        ) {
            return;
        }
        for path in event.paths {
            if !path.is_file() || !self.wants(&path) {
                continue;
            }
            let cdrc = self.clone();
            tokio::spawn(async move {
                if let Err(e) = cdrc.process_file(&path).await {
                    error!("❌ Processing {} failed: {}", path.display(), e);
                }
            });
        }
    }

    /// FreeSWITCH keeps writing its `.csv`; only rotated files are taken.
    fn wants(&self, path: &Path) -> bool {
        self.ctx.dflt().cdr_format != FS_CSV
            || path.extension().and_then(|e| e.to_str()) != Some("csv")
    }

    /// One pass over the folder. Returns the number of files handled.
    pub async fn process_dir(self: &Arc<Self>) -> Result<usize, ChargingError> {
        debug!("Parsing folder {} for CDR files", self.in_dir().display());
        let mut entries = tokio::fs::read_dir(self.in_dir()).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && self.wants(&path) {
                files.push(path);
            }
        }
        let results = join_all(files.iter().map(|p| self.process_file(p))).await;
        for (path, res) in files.iter().zip(&results) {
            if let Err(e) = res {
                error!("❌ Processing {} failed: {}", path.display(), e);
            }
        }
        Ok(results.len())
    }

    /// Converts and posts every record of a file, then moves it out.
    #[instrument(skip(self), fields(file = %path.display()))]
    pub async fn process_file(&self, path: &Path) -> Result<FileStats, ChargingError> {
        let _permit = match &self.open_files {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| ChargingError::ServerError(e.to_string()))?,
            ),
            None => None,
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        info!("Parsing: {}", path.display());
        let started = Instant::now();
        let content = tokio::fs::read_to_string(path).await?;

        let dflt = self.ctx.dflt();
        let mut processor: Box<dyn RecordsProcessor> = match dflt.cdr_format.as_str() {
            CSV | FS_CSV | KAM_FLATSTORE | OSIPS_FLATSTORE | PARTIAL_CSV => Box::new(
                CsvRecordsProcessor::new(self.ctx.clone(), &file_name, &content),
            ),
            FWV => Box::new(FwvRecordsProcessor::new(self.ctx.clone(), &content)),
            XML => Box::new(XmlRecordsProcessor::new(self.ctx.clone(), &content)?),
            other => {
                return Err(ChargingError::Unsupported(format!("CDR format {}", other)));
            }
        };

        let mut stats = FileStats::default();
        let mut row = 0;
        while let Some(next) = processor.process_next_record().await {
            row += 1;
            let cdrs = match next {
                Ok(cdrs) => cdrs,
                Err(e) => {
                    error!("Row {} of {}: {}", row, file_name, e);
                    continue;
                }
            };
            for cdr in cdrs {
                if dflt.dry_run {
                    info!("DryRun CDR: {}", serde_json::to_string(&cdr).unwrap_or_default());
                    continue;
                }
                match self.cdrs.process_cdr(&cdr).await {
                    Ok(()) => stats.posted += 1,
                    Err(e) => error!("❌ Failed sending CDR {}: {}", cdr.origin_id, e),
                }
            }
        }
        stats.processed = processor.processed_records();

        let moved = dflt.cdr_out_dir.join(&file_name);
        if moved != path {
            tokio::fs::rename(path, &moved).await?;
        }
        info!(
            processed = stats.processed,
            posted = stats.posted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✅ Finished {}, moved to {}",
            file_name,
            moved.display()
        );
        Ok(stats)
    }
}
