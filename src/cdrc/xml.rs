// src/cdrc/xml.rs
//! XML files: every element found at `cdr_path` is one record; field ids
//! are absolute `>` separated element paths.

use async_trait::async_trait;
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::HashMap;
use std::sync::Arc;

use super::fields::ConvertOpts;
use super::{CdrcContext, RecordsProcessor};
use crate::engine::Cdr;
use crate::error::ChargingError;
use crate::utils::consts::HIERARCHY_SEP;

/// Element texts of one record keyed by absolute path. The first element
/// of a repeated path wins.
pub type XmlRecord = HashMap<String, String>;

/// Collects the records found at `cdr_path` (root element first).
pub fn parse_records(content: &str, cdr_path: &[&str]) -> Result<Vec<XmlRecord>, ChargingError> {
    let opts = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(content, opts)
        .map_err(|e| ChargingError::ParserError(format!("invalid XML: {}", e)))?;
    let Some((root_name, rest)) = cdr_path.split_first() else {
        return Err(ChargingError::Config("empty cdr_path".to_string()));
    };
    let root = doc.root_element();
    if root.tag_name().name() != *root_name {
        return Ok(Vec::new());
    }

    let mut level = vec![root];
    for name in rest {
        level = level
            .iter()
            .flat_map(|n| n.children())
            .filter(|c| c.is_element() && c.tag_name().name() == *name)
            .collect();
    }

    let prefix = cdr_path.join(HIERARCHY_SEP);
    Ok(level
        .into_iter()
        .map(|node| {
            let mut record = XmlRecord::new();
            collect_texts(node, &prefix, &mut record);
            record
        })
        .collect())
}

fn collect_texts(node: Node, path: &str, record: &mut XmlRecord) {
    let mut has_child_elements = false;
    for child in node.children().filter(Node::is_element) {
        has_child_elements = true;
        let child_path = format!("{}{}{}", path, HIERARCHY_SEP, child.tag_name().name());
        collect_texts(child, &child_path, record);
    }
    if !has_child_elements {
        record
            .entry(path.to_string())
            .or_insert_with(|| node.text().unwrap_or_default().trim().to_string());
    }
}

pub struct XmlRecordsProcessor {
    ctx: Arc<CdrcContext>,
    records: std::vec::IntoIter<XmlRecord>,
    processed: u64,
}

impl XmlRecordsProcessor {
    pub fn new(ctx: Arc<CdrcContext>, content: &str) -> Result<Self, ChargingError> {
        let path: Vec<&str> = ctx
            .dflt()
            .cdr_path
            .split(HIERARCHY_SEP)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let records = parse_records(content, &path)?;
        Ok(Self {
            ctx,
            records: records.into_iter(),
            processed: 0,
        })
    }
}

#[async_trait]
impl RecordsProcessor for XmlRecordsProcessor {
    async fn process_next_record(&mut self) -> Option<Result<Vec<Cdr>, ChargingError>> {
        let record = self.records.next()?;
        self.processed += 1;
        let source = |id: &str| record.get(id).cloned();
        // absent elements fail filters instead of breaking the record
        let opts = ConvertOpts {
            flatstore_len: None,
            strict_filters: false,
        };
        let pending = match self.ctx.convert(&source, opts) {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };
        Some(self.ctx.complete(pending).await)
    }

    fn processed_records(&self) -> u64 {
        self.processed
    }
}
