// src/cdrc/fwv.rs
//! Fixed width files: an optional header line, content lines and an
//! optional trailer line. Field ids are start offsets, the template width
//! says how many characters to take.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::fields::{record_to_cdr, ConvertOpts};
use super::{CdrcContext, RecordsProcessor};
use crate::engine::Cdr;
use crate::error::ChargingError;
use crate::structq::value::{FieldValue, Record};
use crate::utils::FieldTemplate;

/// Cuts `width` characters at `start` and trims the padding side.
pub fn fwv_value(line: &str, start: usize, width: usize, padding: &str) -> Option<String> {
    let raw = line.get(start..start.checked_add(width)?)?;
    let value = match padding {
        "left" => raw.trim_start_matches(' '),
        "right" => raw.trim_end_matches(' '),
        "zeroleft" => raw.trim_start_matches(['0', ' ']),
        "zeroright" => raw.trim_end_matches(['0', ' ']),
        _ => raw,
    };
    Some(value.to_string())
}

/// Width and padding per start offset, out of the templates.
fn layout(templates: &[FieldTemplate]) -> HashMap<String, (usize, String)> {
    templates
        .iter()
        .filter(|t| t.width > 0)
        .flat_map(|t| {
            t.value
                .iter()
                .filter(|r| !r.is_static())
                .map(move |r| (r.id.clone(), (t.width, t.padding.clone())))
        })
        .collect()
}

/// Offsets without a width (filters) read up to the end of the line.
fn line_value(line: &str, layout: &HashMap<String, (usize, String)>, id: &str) -> Option<String> {
    let start: usize = id.trim().parse().ok()?;
    match layout.get(id) {
        Some((width, padding)) => fwv_value(line, start, *width, padding),
        None => line.get(start..).map(str::to_string),
    }
}

pub struct FwvRecordsProcessor {
    ctx: Arc<CdrcContext>,
    lines: std::vec::IntoIter<String>,
    content_layout: HashMap<String, (usize, String)>,
    header: Option<Cdr>,
    header_pending: bool,
    trailer: Option<String>,
    processed: u64,
}

impl FwvRecordsProcessor {
    pub fn new(ctx: Arc<CdrcContext>, content: &str) -> Self {
        let dflt = ctx.dflt();
        let mut lines: Vec<String> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        let trailer = if dflt.trailer_fields.is_empty() {
            None
        } else {
            lines.pop()
        };
        let content_layout = layout(
            &ctx.profiles
                .iter()
                .flat_map(|p| p.content_fields.iter().cloned())
                .collect::<Vec<_>>(),
        );
        let header_pending = !dflt.header_fields.is_empty();
        Self {
            ctx,
            lines: lines.into_iter(),
            content_layout,
            header: None,
            header_pending,
            trailer,
            processed: 0,
        }
    }

    fn side_record(&self, line: &str, templates: &[FieldTemplate]) -> Result<Cdr, ChargingError> {
        let layout = layout(templates);
        let source = |id: &str| line_value(line, &layout, id);
        let dflt = self.ctx.dflt();
        Ok(record_to_cdr(&source, templates, dflt, self.ctx.timezone(), ConvertOpts::default())?.cdr)
    }

    /// Content CDRs inherit what the header set and they left empty.
    fn inherit_header(&self, cdr: &mut Cdr) -> Result<(), ChargingError> {
        let Some(header) = &self.header else {
            return Ok(());
        };
        for tpl in &self.ctx.dflt().header_fields {
            match header.get_field(&tpl.field_id) {
                Some(FieldValue::Str(value)) if !value.is_empty() => {
                    if matches!(cdr.get_field(&tpl.field_id), Some(FieldValue::Str(v)) if v.is_empty()) {
                        cdr.set_field(&tpl.field_id, FieldValue::Str(value))?;
                    }
                }
                Some(_) => {}
                None => {
                    if let Some(value) = header.extra_fields.get(&tpl.field_id) {
                        cdr.extra_fields
                            .entry(tpl.field_id.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn process_line(&self, line: String) -> Result<Vec<Cdr>, ChargingError> {
        let source = |id: &str| line_value(&line, &self.content_layout, id);
        let mut pending = self.ctx.convert(&source, ConvertOpts {
            flatstore_len: None,
            strict_filters: true,
        })?;
        for p in &mut pending {
            self.inherit_header(&mut p.cdr)?;
        }
        self.ctx.complete(pending).await
    }
}

#[async_trait]
impl RecordsProcessor for FwvRecordsProcessor {
    async fn process_next_record(&mut self) -> Option<Result<Vec<Cdr>, ChargingError>> {
        if self.header_pending {
            self.header_pending = false;
            let line = self.lines.next()?;
            let templates = self.ctx.dflt().header_fields.clone();
            match self.side_record(&line, &templates) {
                Ok(h) => {
                    debug!("FWV header parsed, source {}", h.source);
                    self.header = Some(h);
                }
                Err(e) => return Some(Err(e)),
            }
        }
        let Some(line) = self.lines.next() else {
            let trailer = self.trailer.take()?;
            let templates = self.ctx.dflt().trailer_fields.clone();
            return Some(self.side_record(&trailer, &templates).map(|t| {
                debug!("FWV trailer parsed: {:?}", t.extra_fields);
                Vec::new()
            }));
        };
        self.processed += 1;
        Some(self.process_line(line).await)
    }

    fn processed_records(&self) -> u64 {
        self.processed
    }
}
