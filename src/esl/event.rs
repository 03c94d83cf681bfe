// src/esl/event.rs
use chrono::{TimeZone, Utc};
use std::collections::HashMap;

use crate::sessions::GenericEvent;
use crate::utils::consts::*;

pub const CHANNEL_PARK: &str = "CHANNEL_PARK";
pub const CHANNEL_ANSWER: &str = "CHANNEL_ANSWER";
pub const CHANNEL_HANGUP_COMPLETE: &str = "CHANNEL_HANGUP_COMPLETE";

const UUID: &str = "Unique-ID";
const CALL_DEST_NR: &str = "Caller-Destination-Number";
const CALLER_USERNAME: &str = "Caller-Username";
const SETUP_TIME_US: &str = "Caller-Channel-Created-Time";
const ANSWER_TIME_US: &str = "Caller-Channel-Answered-Time";
const CGR_REQTYPE: &str = "variable_cgr_reqtype";
const CGR_TENANT: &str = "variable_cgr_tenant";
const CGR_CATEGORY: &str = "variable_cgr_category";
const CGR_ACCOUNT: &str = "variable_cgr_account";
const CGR_SUBJECT: &str = "variable_cgr_subject";
const CGR_DESTINATION: &str = "variable_cgr_destination";
const CGR_SUPPLIER: &str = "variable_cgr_supplier";
const CGR_COMPUTELCR: &str = "variable_cgr_computelcr";
const CGR_IGNOREPARK: &str = "variable_cgr_ignorepark";
const BILLSEC: &str = "variable_billsec";
const PROGRESS_MEDIASEC: &str = "variable_progress_mediasec";
const HANGUP_CAUSE: &str = "variable_hangup_cause";
const FS_IPV4: &str = "FreeSWITCH-IPv4";
const CALL_DIRECTION: &str = "Call-Direction";

/// One event socket frame: headers plus an optional body.
#[derive(Debug, Clone, Default)]
pub struct EslEvent {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl EslEvent {
    pub fn parse(data: &str) -> Option<Self> {
        let mut headers = HashMap::new();
        let mut in_body = false;
        let mut body_content = String::new();

        for line in data.lines() {
            if in_body {
                body_content.push_str(line);
                body_content.push('\n');
            } else if line.is_empty() {
                in_body = true;
            } else if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_string(), url_decode(value.trim()));
            }
        }

        let mut body = None;
        if in_body && !body_content.trim().is_empty() {
            let body_str = body_content.trim().to_string();
            // text/event-plain wraps the real event in the body
            if headers.get("Content-Type").map(String::as_str) == Some("text/event-plain") {
                if let Some(inner) = Self::parse(&body_str) {
                    headers.extend(inner.headers);
                    return Some(EslEvent {
                        headers,
                        body: inner.body,
                    });
                }
            }
            body = Some(body_str);
        }

        if headers.is_empty() {
            None
        } else {
            Some(EslEvent { headers, body })
        }
    }

    pub fn get_header(&self, key: &str) -> Option<&String> {
        self.headers.get(key)
    }

    fn header(&self, key: &str) -> &str {
        self.headers.get(key).map(String::as_str).unwrap_or_default()
    }

    /// First non empty header among `keys`.
    fn first_of(&self, keys: &[&str]) -> &str {
        keys.iter()
            .map(|k| self.header(k))
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }

    pub fn event_name(&self) -> Option<&String> {
        self.headers.get("Event-Name")
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.event_name().map_or(false, |n| n == name)
    }

    pub fn unique_id(&self) -> &str {
        self.first_of(&[UUID, "Channel-Call-UUID"])
    }

    pub fn call_dest_nr(&self) -> &str {
        self.header(CALL_DEST_NR)
    }

    pub fn request_type(&self) -> &str {
        self.header(CGR_REQTYPE)
    }

    pub fn compute_lcr(&self) -> bool {
        self.header(CGR_COMPUTELCR) == "true"
    }

    pub fn ignore_park(&self) -> bool {
        self.header(CGR_IGNOREPARK) == "true"
    }

    /// Projects the channel onto the generic event the session manager
    /// consumes. Setup and answer times arrive as epoch microseconds;
    /// `0` means the stage was never reached.
    pub fn as_generic_event(&self, extra_fields: &[String]) -> GenericEvent {
        let mut ev = GenericEvent::new();
        ev.set(EVENT_NAME, self.event_name().cloned().unwrap_or_default());
        ev.set(TOR, VOICE);
        ev.set(ACCID, self.unique_id());
        ev.set(CDRHOST, self.header(FS_IPV4));
        ev.set(
            CDRSOURCE,
            format!("FS_{}", self.event_name().map(String::as_str).unwrap_or_default()),
        );
        ev.set(DIRECTION, META_OUT);
        let account = self.first_of(&[CGR_ACCOUNT, CALLER_USERNAME]);
        ev.set(ACCOUNT, account);
        ev.set(SUBJECT, self.first_of(&[CGR_SUBJECT, CGR_ACCOUNT, CALLER_USERNAME]));
        ev.set(DESTINATION, self.first_of(&[CGR_DESTINATION, CALL_DEST_NR]));
        for (key, header) in [
            (REQTYPE, CGR_REQTYPE),
            (TENANT, CGR_TENANT),
            (CATEGORY, CGR_CATEGORY),
            (SUPPLIER, CGR_SUPPLIER),
            (DISCONNECT_CAUSE, HANGUP_CAUSE),
        ] {
            let value = self.header(header);
            if !value.is_empty() {
                ev.set(key, value);
            }
        }
        if let Some(t) = epoch_micros(self.header(SETUP_TIME_US)) {
            ev.set(SETUP_TIME, t);
        }
        if let Some(t) = epoch_micros(self.header(ANSWER_TIME_US)) {
            ev.set(ANSWER_TIME, t);
        }
        if let Some(secs) = self.headers.get(BILLSEC).filter(|v| !v.is_empty()) {
            ev.set(USAGE, format!("{}s", secs));
        }
        if let Some(pdd) = self.headers.get(PROGRESS_MEDIASEC).filter(|v| !v.is_empty()) {
            ev.set(PDD, format!("{}s", pdd));
        }
        if let Some(dir) = self.headers.get(CALL_DIRECTION) {
            ev.set("CallDirection", dir.as_str());
        }
        for field in extra_fields {
            let name = field.strip_prefix("variable_").unwrap_or(field);
            let value = self
                .headers
                .get(field)
                .or_else(|| self.headers.get(&format!("variable_{}", field)));
            if let Some(v) = value {
                ev.set(name, v.as_str());
            }
        }
        ev
    }

    /// True when the channel lacks something the charging needs.
    pub fn missing_parameter(&self) -> bool {
        let ev = self.as_generic_event(&[]);
        [ACCID, ACCOUNT, SUBJECT, DESTINATION]
            .iter()
            .any(|k| ev.field_as_string(k).is_empty())
            || self.header(ANSWER_TIME_US).is_empty()
    }
}

fn epoch_micros(raw: &str) -> Option<String> {
    let us: i64 = raw.parse().ok().filter(|v| *v > 0)?;
    Utc.timestamp_opt(us / 1_000_000, ((us % 1_000_000) * 1_000) as u32)
        .single().map(|t| t.to_rfc3339())
}

/// Decodes the `%XX` escapes of plain event headers.
fn url_decode(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Renders a list as a FreeSWITCH array variable.
pub fn fs_array(items: &[String]) -> String {
    format!("ARRAY::{}", items.join("|:"))
}

/// Parses `show channels` CSV output into one map per channel.
pub fn parse_channels(output: &str) -> Vec<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(output.trim().as_bytes());
    let Ok(header) = reader.headers().cloned() else {
        return Vec::new();
    };
    reader
        .records()
        .filter_map(Result::ok)
        .filter(|r| r.len() == header.len())
        .map(|r| {
            header
                .iter()
                .zip(r.iter())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}
