// src/agents/diameter/ccr.rs
//! Credit-Control-Request view, its projection onto a generic event and the
//! bare Credit-Control-Answer built from it.

use chrono::Duration;
use std::collections::HashMap;

use super::avp::Avp;
use super::codec::DiameterError;
use super::message::{find_avps, split_path, Message};
use crate::error::ChargingError;
use crate::sessions::GenericEvent;
use crate::utils::template::{
    rsr_filters_pass, FieldSource, FieldTemplate, META_COMPOSED, META_GROUPED, META_HANDLER,
};
use crate::utils::time::format_go_duration;

pub const CGR_MAX_USAGE: &str = "CGRMaxUsage";
pub const CGR_RESULT_CODE: &str = "CGRResultCode";
pub const CGR_ERROR: &str = "CGRError";

/// Usage derived from the CC-Time units and the request sequence.
pub const HANDLER_CCR_USAGE: &str = "*ccr_usage";
/// `value;exponent` pair (CC-Money>Unit-Value) rendered as a decimal.
pub const HANDLER_VALUE_EXPONENT: &str = "*value_exponent";

pub const REQUEST_INITIAL: u32 = 1;
pub const REQUEST_UPDATE: u32 = 2;
pub const REQUEST_TERMINATE: u32 = 3;
pub const REQUEST_EVENT: u32 = 4;

/// Scratchpad shared by the request processors of one CCR.
pub type ProcessorVars = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct Ccr {
    pub session_id: String,
    pub origin_host: String,
    pub origin_realm: String,
    pub auth_application_id: u32,
    pub service_context_id: String,
    pub request_type: u32,
    pub request_number: u32,
    pub requested_cc_time: Option<u32>,
    pub used_cc_time: Option<u32>,
    pub debit_interval: Duration,
    pub message: Message,
}

fn parse_u32(m: &Message, path: &[&str]) -> Option<u32> {
    m.value(path).and_then(|v| v.parse().ok())
}

impl Ccr {
    pub fn from_message(message: Message, debit_interval: Duration) -> Result<Self, DiameterError> {
        let session_id = message
            .value(&["Session-Id"])
            .ok_or_else(|| DiameterError::InvalidValue("CCR without Session-Id".into()))?;
        let request_type = parse_u32(&message, &["CC-Request-Type"])
            .ok_or_else(|| DiameterError::InvalidValue("CCR without CC-Request-Type".into()))?;
        Ok(Self {
            session_id,
            origin_host: message.value(&["Origin-Host"]).unwrap_or_default(),
            origin_realm: message.value(&["Origin-Realm"]).unwrap_or_default(),
            auth_application_id: parse_u32(&message, &["Auth-Application-Id"]).unwrap_or_default(),
            service_context_id: message.value(&["Service-Context-Id"]).unwrap_or_default(),
            request_type,
            request_number: parse_u32(&message, &["CC-Request-Number"]).unwrap_or_default(),
            requested_cc_time: parse_u32(&message, &["Requested-Service-Unit", "CC-Time"]),
            used_cc_time: parse_u32(&message, &["Used-Service-Unit", "CC-Time"]),
            debit_interval,
            message,
        })
    }

    /// Initial and update requests reserve one debit interval; terminate
    /// reports the used units plus the intervals consumed by earlier updates.
    pub fn usage(&self) -> Duration {
        let secs = |v: Option<u32>| Duration::seconds(v.unwrap_or_default() as i64);
        match self.request_type {
            REQUEST_INITIAL | REQUEST_UPDATE if !self.debit_interval.is_zero() => self.debit_interval,
            REQUEST_TERMINATE => {
                let previous = self.request_number.saturating_sub(1) as i32;
                secs(self.used_cc_time) + self.debit_interval * previous
            }
            _ => secs(self.requested_cc_time.or(self.used_cc_time)),
        }
    }

    /// Answer skeleton: identifiers copied from the request, our identity.
    pub fn bare_cca(&self, origin_host: &str, origin_realm: &str) -> Result<Message, DiameterError> {
        self.message
            .answer()
            .with_avp("Session-Id", &self.session_id)?
            .with_avp("Origin-Host", origin_host)?
            .with_avp("Origin-Realm", origin_realm)?
            .with_avp("Auth-Application-Id", &self.auth_application_id.to_string())?
            .with_avp("CC-Request-Type", &self.request_type.to_string())?
            .with_avp("CC-Request-Number", &self.request_number.to_string())
    }

    /// Runs the request filters of a processor.
    pub fn passes_filters(&self, filters: &[crate::utils::RsrField], vars: &ProcessorVars) -> bool {
        rsr_filters_pass(filters, &self.source(vars, false))
    }

    fn source<'a>(&'a self, vars: &'a ProcessorVars, lenient: bool) -> CcrSource<'a> {
        CcrSource {
            root: &self.message.avps,
            avps: &self.message.avps,
            prefix: Vec::new(),
            vars,
            lenient,
        }
    }

    /// Output value of one template; `None` when its filters do not pass.
    pub fn field_value(
        &self,
        tpl: &FieldTemplate,
        vars: &ProcessorVars,
    ) -> Result<Option<String>, ChargingError> {
        match tpl.field_type.as_str() {
            META_GROUPED => self.grouped_value(tpl, vars),
            META_HANDLER => {
                if !tpl.filters_pass(&self.source(vars, false)) {
                    return Ok(None);
                }
                self.handler_value(tpl, vars).map(Some)
            }
            META_COMPOSED | "" => {
                if !tpl.filters_pass(&self.source(vars, false)) {
                    return Ok(None);
                }
                tpl.compose(&self.source(vars, true)).map(Some)
            }
            other => Err(ChargingError::Unsupported(format!("field type {}", other))),
        }
    }

    /// Takes the value from the first group instance whose members pass the filters.
    fn grouped_value(
        &self,
        tpl: &FieldTemplate,
        vars: &ProcessorVars,
    ) -> Result<Option<String>, ChargingError> {
        let Some(first) = tpl.value.iter().find(|r| !r.is_static()) else {
            return tpl.compose(&self.source(vars, true)).map(Some);
        };
        let path = split_path(&first.id);
        let Some((_, parent)) = path.split_last() else {
            return Ok(None);
        };
        for group in find_avps(&self.message.avps, parent) {
            let src = CcrSource {
                root: &self.message.avps,
                avps: group.children(),
                prefix: parent.to_vec(),
                vars,
                lenient: false,
            };
            if tpl.filters_pass(&src) {
                let lenient = CcrSource { lenient: true, ..src };
                return tpl.compose(&lenient).map(Some);
            }
        }
        Ok(None)
    }

    fn handler_value(&self, tpl: &FieldTemplate, vars: &ProcessorVars) -> Result<String, ChargingError> {
        match tpl.handler_id.as_str() {
            HANDLER_CCR_USAGE => Ok(format_go_duration(self.usage())),
            HANDLER_VALUE_EXPONENT => {
                let src = self.source(vars, true);
                let parts: Vec<String> = tpl
                    .value
                    .iter()
                    .map(|r| match r.static_value.as_ref() {
                        Some(s) => s.clone(),
                        None => r.parse_value(&src.field_value(&r.id).unwrap_or_default()),
                    })
                    .collect();
                let [value, exponent] = parts.as_slice() else {
                    return Err(ChargingError::InvalidArgument(format!(
                        "{} expects value and exponent",
                        HANDLER_VALUE_EXPONENT
                    )));
                };
                let value: i64 = value
                    .parse()
                    .map_err(|_| ChargingError::InvalidArgument(format!("value <{}>", value)))?;
                let exponent: i32 = exponent
                    .parse()
                    .map_err(|_| ChargingError::InvalidArgument(format!("exponent <{}>", exponent)))?;
                Ok((value as f64 * 10f64.powi(exponent)).to_string())
            }
            other => Err(ChargingError::Unsupported(format!("handler {}", other))),
        }
    }

    /// Projects the CCR onto a generic event through the processor templates.
    pub fn as_event(
        &self,
        fields: &[FieldTemplate],
        vars: &ProcessorVars,
    ) -> Result<GenericEvent, ChargingError> {
        let mut ev = GenericEvent::new();
        for tpl in fields {
            let Some(value) = self.field_value(tpl, vars)? else {
                continue;
            };
            if tpl.mandatory && value.is_empty() {
                return Err(ChargingError::MandatoryIeMissing);
            }
            let value = if tpl.append {
                ev.field_as_string(&tpl.field_id) + &value
            } else {
                value
            };
            ev.set(&tpl.field_id, value);
        }
        Ok(ev)
    }

    /// Writes the processor answer templates into `cca`.
    pub fn set_cca_fields(
        &self,
        cca: &mut Message,
        fields: &[FieldTemplate],
        vars: &ProcessorVars,
    ) -> Result<(), ChargingError> {
        for tpl in fields {
            let Some(value) = self.field_value(tpl, vars)? else {
                continue;
            };
            if value.is_empty() {
                if tpl.mandatory {
                    return Err(ChargingError::MandatoryIeMissing);
                }
                continue;
            }
            cca.set_with_path(&split_path(&tpl.field_id), &value, tpl.append)?;
        }
        Ok(())
    }
}

/// AVP lookup scoped to a list of AVPs; processor variables shadow AVP paths.
struct CcrSource<'a> {
    root: &'a [Avp],
    avps: &'a [Avp],
    /// Path of the group `avps` belongs to, stripped from lookups.
    prefix: Vec<&'a str>,
    vars: &'a ProcessorVars,
    /// Missing AVPs read as empty instead of absent.
    lenient: bool,
}

impl FieldSource for CcrSource<'_> {
    fn field_value(&self, id: &str) -> Option<String> {
        if let Some(v) = self.vars.get(id) {
            return Some(v.clone());
        }
        let path = split_path(id);
        let candidates = match path.strip_prefix(self.prefix.as_slice()) {
            Some(scoped) if !self.prefix.is_empty() => find_avps(self.avps, scoped),
            _ => find_avps(self.root, &path),
        };
        let found = candidates.first().map(|a| a.data.as_text());
        match found {
            Some(v) => Some(v),
            None if self.lenient => Some(String::new()),
            None => None,
        }
    }
}
