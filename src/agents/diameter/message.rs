// src/agents/diameter/message.rs
//! Diameter message: 20 byte header plus AVPs, with `>` separated path
//! access into grouped AVPs.

use bytes::{BufMut, BytesMut};

use super::avp::{decode_avps, Avp, AvpData};
use super::codec::DiameterError;
use super::dictionary::{self, AvpType};

pub const HEADER_LEN: usize = 20;
pub const VERSION: u8 = 1;

pub const FLAG_REQUEST: u8 = 0x80;
pub const FLAG_PROXIABLE: u8 = 0x40;
pub const FLAG_ERROR: u8 = 0x20;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop: u32,
    pub end_to_end: u32,
    pub avps: Vec<Avp>,
}

impl Message {
    pub fn request(command_code: u32, application_id: u32, hop_by_hop: u32, end_to_end: u32) -> Self {
        Self {
            flags: FLAG_REQUEST | FLAG_PROXIABLE,
            command_code,
            application_id,
            hop_by_hop,
            end_to_end,
            avps: Vec::new(),
        }
    }

    /// Empty answer carrying this request's identifiers.
    pub fn answer(&self) -> Self {
        Self {
            flags: self.flags & !FLAG_REQUEST,
            command_code: self.command_code,
            application_id: self.application_id,
            hop_by_hop: self.hop_by_hop,
            end_to_end: self.end_to_end,
            avps: Vec::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        self.flags & FLAG_REQUEST != 0
    }

    pub fn with_avp(mut self, name: &str, value: &str) -> Result<Self, DiameterError> {
        self.avps.push(Avp::from_text(name, value)?);
        Ok(self)
    }

    pub fn add(&mut self, avp: Avp) {
        self.avps.push(avp);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        for avp in &self.avps {
            avp.encode(&mut body);
        }
        buf.put_u8(VERSION);
        buf.put_uint((HEADER_LEN + body.len()) as u64, 3);
        buf.put_u8(self.flags);
        buf.put_uint(self.command_code as u64, 3);
        buf.put_u32(self.application_id);
        buf.put_u32(self.hop_by_hop);
        buf.put_u32(self.end_to_end);
        buf.put_slice(&body);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }

    /// Decodes one complete message.
    pub fn decode(data: &[u8]) -> Result<Self, DiameterError> {
        if data.len() < HEADER_LEN {
            return Err(DiameterError::Truncated("message header"));
        }
        if data[0] != VERSION {
            return Err(DiameterError::UnsupportedVersion(data[0]));
        }
        let len = u32::from_be_bytes([0, data[1], data[2], data[3]]) as usize;
        if len < HEADER_LEN || len > data.len() {
            return Err(DiameterError::Truncated("message length"));
        }
        let word = |i: usize| u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Ok(Self {
            flags: data[4],
            command_code: u32::from_be_bytes([0, data[5], data[6], data[7]]),
            application_id: word(8),
            hop_by_hop: word(12),
            end_to_end: word(16),
            avps: decode_avps(&data[HEADER_LEN..len])?,
        })
    }

    /// Every AVP reachable through `path`.
    pub fn find(&self, path: &[&str]) -> Vec<&Avp> {
        find_avps(&self.avps, path)
    }

    /// Text of the first AVP at `path`.
    pub fn value(&self, path: &[&str]) -> Option<String> {
        self.find(path).first().map(|a| a.data.as_text())
    }

    /// Writes `value` at `path`, creating grouped parents as needed. Without
    /// `append` an existing AVP on the way is reused and the leaf replaced.
    pub fn set_with_path(&mut self, path: &[&str], value: &str, append: bool) -> Result<(), DiameterError> {
        set_in(&mut self.avps, path, value, append)
    }
}

fn matches(avp: &Avp, name: &str) -> bool {
    avp.def().map(|d| d.name == name).unwrap_or(false)
}

pub fn find_avps<'a>(avps: &'a [Avp], path: &[&str]) -> Vec<&'a Avp> {
    let mut out = Vec::new();
    find_in(avps, path, &mut out);
    out
}

fn find_in<'a>(avps: &'a [Avp], path: &[&str], out: &mut Vec<&'a Avp>) {
    let Some((name, rest)) = path.split_first() else {
        return;
    };
    for avp in avps.iter().filter(|a| matches(a, name)) {
        if rest.is_empty() {
            out.push(avp);
        } else {
            find_in(avp.children(), rest, out);
        }
    }
}

fn set_in(avps: &mut Vec<Avp>, path: &[&str], value: &str, append: bool) -> Result<(), DiameterError> {
    let Some((name, rest)) = path.split_first() else {
        return Err(DiameterError::InvalidValue("empty AVP path".into()));
    };
    let def = dictionary::by_name(name).ok_or_else(|| DiameterError::UnknownAvp(name.to_string()))?;
    let existing = if append {
        None
    } else {
        avps.iter().position(|a| a.code == def.code && a.vendor_id == def.vendor_id)
    };
    if rest.is_empty() {
        let avp = Avp::new(def, AvpData::from_text(def.avp_type, value)?);
        match existing {
            Some(i) => avps[i] = avp,
            None => avps.push(avp),
        }
        return Ok(());
    }
    if def.avp_type != AvpType::Grouped {
        return Err(DiameterError::InvalidValue(format!("{} is not grouped", name)));
    }
    let idx = match existing {
        Some(i) => i,
        None => {
            avps.push(Avp::new(def, AvpData::Grouped(Vec::new())));
            avps.len() - 1
        }
    };
    let children = avps[idx]
        .children_mut()
        .ok_or_else(|| DiameterError::InvalidValue(format!("{} is not grouped", name)))?;
    set_in(children, rest, value, false)
}

/// Splits `A>B>C` into its parts.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(crate::utils::consts::HIERARCHY_SEP)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
