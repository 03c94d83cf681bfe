// src/cdrc/fields.rs
//! Turns one source record into a CDR by running a profile's field
//! templates over it.

use tracing::debug;

use super::CdrcProfile;
use crate::engine::Cdr;
use crate::error::ChargingError;
use crate::utils::consts::{ACCID, DATA, USAGE};
use crate::utils::rsr::{parse_rsr_fields, RsrField};
use crate::utils::template::*;
use crate::utils::time::parse_time;
use crate::utils::FieldSource;

/// Separator between the operands of `*substract_usage`.
const OPERAND_SEP: &str = "|";

/// Format specific knobs of the conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOpts {
    /// Length of a paired flatstore record; overrides the origin id and
    /// usage templates.
    pub flatstore_len: Option<usize>,
    /// Absent filter fields are an error instead of a mismatch.
    pub strict_filters: bool,
}

/// A converted CDR still waiting for its `*http_post` fields.
#[derive(Debug, Clone)]
pub struct PendingCdr {
    pub cdr: Cdr,
    pub http_fields: Vec<FieldTemplate>,
}

/// Evaluates record level filters.
pub fn filters_pass(
    filters: &[RsrField],
    source: &dyn FieldSource,
    strict: bool,
) -> Result<bool, ChargingError> {
    for filter in filters {
        if filter.is_static() {
            continue;
        }
        match source.field_value(&filter.id) {
            Some(v) if filter.filter_passes(&v) => {}
            Some(_) => return Ok(false),
            None if strict => {
                return Err(ChargingError::ParserError(format!(
                    "cannot compile filter {}",
                    filter.rules
                )))
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// Builds the CDR of one record with the given templates.
pub fn record_to_cdr(
    source: &dyn FieldSource,
    templates: &[FieldTemplate],
    profile: &CdrcProfile,
    tz: &str,
    opts: ConvertOpts,
) -> Result<PendingCdr, ChargingError> {
    let mut cdr = Cdr {
        origin_host: "0.0.0.0".to_string(),
        source: profile.cdr_source_id.clone(),
        ..Default::default()
    };
    let mut http_fields = Vec::new();

    for tpl in templates {
        if !filters_pass(&tpl.field_filter, source, opts.strict_filters)? {
            continue;
        }
        let tpl = flatstore_override(tpl, opts.flatstore_len)?;
        let value = match tpl.field_type.as_str() {
            META_COMPOSED | META_CONSTANT => tpl.compose(source)?,
            META_UNIX_TIMESTAMP => unix_timestamp(&tpl, source, tz)?,
            META_HANDLER => run_handler(&tpl, source, tz)?,
            META_HTTP_POST => {
                http_fields.push(FieldTemplate::clone(&tpl));
                continue;
            }
            META_FILLER => continue,
            other => {
                return Err(ChargingError::Unsupported(format!(
                    "field type {}",
                    other
                )))
            }
        };
        cdr.parse_field_value(&tpl.field_id, &value, tz)?;
    }

    cdr.compute_cgrid();
    if cdr.tor == DATA && profile.data_usage_multiply_factor != 0.0 {
        let ns = cdr.usage.num_nanoseconds().unwrap_or(i64::MAX) as f64;
        cdr.usage = chrono::Duration::nanoseconds((ns * profile.data_usage_multiply_factor) as i64);
    }
    Ok(PendingCdr { cdr, http_fields })
}

fn flatstore_override(
    tpl: &FieldTemplate,
    flatstore_len: Option<usize>,
) -> Result<std::borrow::Cow<'_, FieldTemplate>, ChargingError> {
    let Some(len) = flatstore_len else {
        return Ok(std::borrow::Cow::Borrowed(tpl));
    };
    // origin id is callid, from tag and to tag; the paired duration is appended last
    let value = match tpl.field_id.as_str() {
        ACCID => parse_rsr_fields("3;1;2")?,
        USAGE => parse_rsr_fields(&len.saturating_sub(1).to_string())?,
        _ => return Ok(std::borrow::Cow::Borrowed(tpl)),
    };
    let mut owned = tpl.clone();
    owned.value = value;
    Ok(std::borrow::Cow::Owned(owned))
}

/// Like `*composed`, but every dynamic part is a time rendered as Unix seconds.
fn unix_timestamp(tpl: &FieldTemplate, source: &dyn FieldSource, tz: &str) -> Result<String, ChargingError> {
    let mut out = String::new();
    for rsr in &tpl.value {
        if rsr.is_static() {
            out.push_str(&rsr.parse_value(""));
            continue;
        }
        let raw = source.field_value(&rsr.id).ok_or_else(|| {
            ChargingError::ParserError(format!("cannot extract field {}", tpl.tag))
        })?;
        let secs = parse_time(&rsr.parse_value(&raw), tz)?
            .map(|t| t.timestamp())
            .unwrap_or_default();
        out.push_str(&secs.to_string());
    }
    Ok(out)
}

fn run_handler(tpl: &FieldTemplate, source: &dyn FieldSource, tz: &str) -> Result<String, ChargingError> {
    match tpl.handler_id.as_str() {
        HANDLER_SUBSTRACT_USAGE => {
            let usage = substract_usage(&tpl.value, source, tz)?;
            Ok(format!("{}ns", usage.num_nanoseconds().unwrap_or_default()))
        }
        other => Err(ChargingError::Unsupported(format!("handler {}", other))),
    }
}

/// `end|start`: both sides are composed out of their parts and parsed as
/// times; the result is their difference.
pub fn substract_usage(
    parts: &[RsrField],
    source: &dyn FieldSource,
    tz: &str,
) -> Result<chrono::Duration, ChargingError> {
    let mut operands = vec![String::new()];
    for rsr in parts {
        if rsr.is_static() {
            let value = rsr.parse_value("");
            if value == OPERAND_SEP {
                operands.push(String::new());
                continue;
            }
            if let Some(last) = operands.last_mut() {
                last.push_str(&value);
            }
            continue;
        }
        let raw = source.field_value(&rsr.id).ok_or_else(|| {
            ChargingError::ParserError(format!("cannot extract field {}", rsr.id))
        })?;
        if let Some(last) = operands.last_mut() {
            last.push_str(&rsr.parse_value(&raw));
        }
    }
    if operands.len() != 2 {
        return Err(ChargingError::ParserError(format!(
            "{} expects two operands, got {}",
            HANDLER_SUBSTRACT_USAGE,
            operands.len()
        )));
    }
    let end = parse_time(&operands[0], tz)?;
    let start = parse_time(&operands[1], tz)?;
    match (end, start) {
        (Some(end), Some(start)) => Ok(end - start),
        _ => Ok(chrono::Duration::zero()),
    }
}

/// Resolves the lazy `*http_post` fields: the CDR built so far is posted as
/// JSON and the response body becomes the field value.
pub async fn apply_http_fields(
    pending: PendingCdr,
    client: &reqwest::Client,
    tz: &str,
) -> Result<Cdr, ChargingError> {
    let PendingCdr { mut cdr, http_fields } = pending;
    for tpl in &http_fields {
        let addr = tpl.static_value();
        let body = match post_json(client, &addr, &cdr).await {
            Ok(body) => body,
            Err(e) if tpl.mandatory => return Err(e),
            Err(e) => {
                debug!("http_post to {} failed: {}", addr, e);
                String::new()
            }
        };
        if body.is_empty() && tpl.mandatory {
            return Err(ChargingError::ParserError(format!(
                "MANDATORY_IE_MISSING: empty result for http_post field {}",
                tpl.tag
            )));
        }
        cdr.parse_field_value(&tpl.field_id, &body, tz)?;
    }
    Ok(cdr)
}

async fn post_json(client: &reqwest::Client, addr: &str, cdr: &Cdr) -> Result<String, ChargingError> {
    let response = client
        .post(addr)
        .json(cdr)
        .send()
        .await
        .map_err(|e| ChargingError::Connection(e.to_string()))?;
    response
        .text()
        .await
        .map_err(|e| ChargingError::Connection(e.to_string()))
}
