// src/agents/diameter/avp.rs
//! Attribute-Value Pairs: typed payloads and their wire form.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           AVP Code                            |
//! |V M P r r r r r|                  AVP Length                   |
//! |                        Vendor-ID (opt)                        |
//! |    Data ...  (padded to 32 bits, padding not counted in length)
//! ```

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use std::net::IpAddr;

use super::codec::DiameterError;
use super::dictionary::{self, AvpDef, AvpType};

pub const FLAG_VENDOR: u8 = 0x80;
pub const FLAG_MANDATORY: u8 = 0x40;

/// Seconds between the NTP era (1900) and the Unix epoch.
const NTP_OFFSET: i64 = 2_208_988_800;

#[derive(Debug, Clone, PartialEq)]
pub enum AvpData {
    OctetString(Vec<u8>),
    Integer32(i32),
    Integer64(i64),
    Unsigned32(u32),
    Unsigned64(u64),
    Float32(f32),
    Float64(f64),
    Enumerated(i32),
    Utf8String(String),
    Identity(String),
    Address(IpAddr),
    Time(DateTime<Utc>),
    Grouped(Vec<Avp>),
}

impl AvpData {
    /// Parses the textual form into the dictionary type.
    pub fn from_text(avp_type: AvpType, value: &str) -> Result<Self, DiameterError> {
        let bad = || DiameterError::InvalidValue(format!("{:?} <{}>", avp_type, value));
        let v = value.trim();
        Ok(match avp_type {
            AvpType::OctetString => AvpData::OctetString(value.as_bytes().to_vec()),
            AvpType::Utf8String | AvpType::DiameterUri => AvpData::Utf8String(value.to_string()),
            AvpType::DiameterIdentity => AvpData::Identity(value.to_string()),
            AvpType::Integer32 => AvpData::Integer32(v.parse().map_err(|_| bad())?),
            AvpType::Integer64 => AvpData::Integer64(v.parse().map_err(|_| bad())?),
            AvpType::Enumerated => AvpData::Enumerated(v.parse().map_err(|_| bad())?),
            AvpType::Unsigned32 => AvpData::Unsigned32(parse_unsigned(v).ok_or_else(bad)? as u32),
            AvpType::Unsigned64 => AvpData::Unsigned64(parse_unsigned(v).ok_or_else(bad)?),
            AvpType::Float32 => AvpData::Float32(v.parse().map_err(|_| bad())?),
            AvpType::Float64 => AvpData::Float64(v.parse().map_err(|_| bad())?),
            AvpType::Address => AvpData::Address(v.parse().map_err(|_| bad())?),
            AvpType::Time => AvpData::Time(
                crate::utils::time::parse_time(v, "UTC")
                    .ok()
                    .flatten()
                    .ok_or_else(bad)?,
            ),
            AvpType::Grouped => return Err(bad()),
        })
    }

    /// Text rendering used by field templates.
    pub fn as_text(&self) -> String {
        match self {
            AvpData::OctetString(b) => String::from_utf8_lossy(b).into_owned(),
            AvpData::Integer32(v) | AvpData::Enumerated(v) => v.to_string(),
            AvpData::Integer64(v) => v.to_string(),
            AvpData::Unsigned32(v) => v.to_string(),
            AvpData::Unsigned64(v) => v.to_string(),
            AvpData::Float32(v) => v.to_string(),
            AvpData::Float64(v) => v.to_string(),
            AvpData::Utf8String(s) | AvpData::Identity(s) => s.clone(),
            AvpData::Address(a) => a.to_string(),
            AvpData::Time(t) => t.to_rfc3339(),
            AvpData::Grouped(_) => String::new(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            AvpData::OctetString(b) => buf.put_slice(b),
            AvpData::Utf8String(s) | AvpData::Identity(s) => buf.put_slice(s.as_bytes()),
            AvpData::Integer32(v) | AvpData::Enumerated(v) => buf.put_i32(*v),
            AvpData::Integer64(v) => buf.put_i64(*v),
            AvpData::Unsigned32(v) => buf.put_u32(*v),
            AvpData::Unsigned64(v) => buf.put_u64(*v),
            AvpData::Float32(v) => buf.put_f32(*v),
            AvpData::Float64(v) => buf.put_f64(*v),
            AvpData::Address(IpAddr::V4(a)) => {
                buf.put_u16(1);
                buf.put_slice(&a.octets());
            }
            AvpData::Address(IpAddr::V6(a)) => {
                buf.put_u16(2);
                buf.put_slice(&a.octets());
            }
            AvpData::Time(t) => buf.put_u32((t.timestamp() + NTP_OFFSET) as u32),
            AvpData::Grouped(avps) => {
                for avp in avps {
                    avp.encode(buf);
                }
            }
        }
    }

    fn decode(avp_type: Option<AvpType>, data: &[u8]) -> Result<Self, DiameterError> {
        let short = || DiameterError::Truncated("avp data");
        let fixed = |n: usize| -> Result<&[u8], DiameterError> {
            if data.len() == n {
                Ok(data)
            } else {
                Err(short())
            }
        };
        Ok(match avp_type {
            None | Some(AvpType::OctetString) => AvpData::OctetString(data.to_vec()),
            Some(AvpType::Utf8String) | Some(AvpType::DiameterUri) => {
                AvpData::Utf8String(String::from_utf8_lossy(data).into_owned())
            }
            Some(AvpType::DiameterIdentity) => {
                AvpData::Identity(String::from_utf8_lossy(data).into_owned())
            }
            Some(AvpType::Integer32) => AvpData::Integer32(i32::from_be_bytes(array(fixed(4)?)?)),
            Some(AvpType::Enumerated) => AvpData::Enumerated(i32::from_be_bytes(array(fixed(4)?)?)),
            Some(AvpType::Integer64) => AvpData::Integer64(i64::from_be_bytes(array(fixed(8)?)?)),
            Some(AvpType::Unsigned32) => AvpData::Unsigned32(u32::from_be_bytes(array(fixed(4)?)?)),
            Some(AvpType::Unsigned64) => AvpData::Unsigned64(u64::from_be_bytes(array(fixed(8)?)?)),
            Some(AvpType::Float32) => AvpData::Float32(f32::from_be_bytes(array(fixed(4)?)?)),
            Some(AvpType::Float64) => AvpData::Float64(f64::from_be_bytes(array(fixed(8)?)?)),
            Some(AvpType::Time) => {
                let ntp = u32::from_be_bytes(array(fixed(4)?)?) as i64;
                let t = Utc
                    .timestamp_opt(ntp - NTP_OFFSET, 0)
                    .single()
                    .ok_or_else(|| DiameterError::InvalidValue(format!("time {}", ntp)))?;
                AvpData::Time(t)
            }
            Some(AvpType::Address) => {
                if data.len() < 2 {
                    return Err(short());
                }
                let family = u16::from_be_bytes([data[0], data[1]]);
                match (family, data.len()) {
                    (1, 6) => AvpData::Address(IpAddr::from(array::<4>(&data[2..])?)),
                    (2, 18) => AvpData::Address(IpAddr::from(array::<16>(&data[2..])?)),
                    _ => AvpData::OctetString(data.to_vec()),
                }
            }
            Some(AvpType::Grouped) => AvpData::Grouped(decode_avps(data)?),
        })
    }
}

fn parse_unsigned(v: &str) -> Option<u64> {
    v.parse::<u64>()
        .ok()
        .or_else(|| v.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
}

fn array<const N: usize>(data: &[u8]) -> Result<[u8; N], DiameterError> {
    data.try_into().map_err(|_| DiameterError::Truncated("avp data"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Avp {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: u32,
    pub data: AvpData,
}

impl Avp {
    pub fn new(def: &AvpDef, data: AvpData) -> Self {
        let mut flags = if def.mandatory { FLAG_MANDATORY } else { 0 };
        if def.vendor_id != 0 {
            flags |= FLAG_VENDOR;
        }
        Self {
            code: def.code,
            flags,
            vendor_id: def.vendor_id,
            data,
        }
    }

    /// Builds an AVP from its dictionary name and text value.
    pub fn from_text(name: &str, value: &str) -> Result<Self, DiameterError> {
        let def = dictionary::by_name(name).ok_or_else(|| DiameterError::UnknownAvp(name.to_string()))?;
        Ok(Self::new(def, AvpData::from_text(def.avp_type, value)?))
    }

    pub fn grouped(name: &str, children: Vec<Avp>) -> Result<Self, DiameterError> {
        let def = dictionary::by_name(name).ok_or_else(|| DiameterError::UnknownAvp(name.to_string()))?;
        if def.avp_type != AvpType::Grouped {
            return Err(DiameterError::InvalidValue(format!("{} is not grouped", name)));
        }
        Ok(Self::new(def, AvpData::Grouped(children)))
    }

    pub fn def(&self) -> Option<&'static AvpDef> {
        dictionary::by_code(self.code, self.vendor_id)
    }

    pub fn name(&self) -> String {
        match self.def() {
            Some(d) => d.name.to_string(),
            None => format!("{}:{}", self.vendor_id, self.code),
        }
    }

    pub fn children(&self) -> &[Avp] {
        match &self.data {
            AvpData::Grouped(avps) => avps,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Avp>> {
        match &mut self.data {
            AvpData::Grouped(avps) => Some(avps),
            _ => None,
        }
    }

    fn header_len(&self) -> usize {
        if self.flags & FLAG_VENDOR != 0 {
            12
        } else {
            8
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut data = BytesMut::new();
        self.data.encode(&mut data);
        let len = self.header_len() + data.len();
        buf.put_u32(self.code);
        buf.put_u8(self.flags);
        buf.put_uint(len as u64, 3);
        if self.flags & FLAG_VENDOR != 0 {
            buf.put_u32(self.vendor_id);
        }
        buf.put_slice(&data);
        buf.put_bytes(0, padding(data.len()));
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Decodes a sequence of AVPs filling `data` exactly (padding included).
pub fn decode_avps(mut data: &[u8]) -> Result<Vec<Avp>, DiameterError> {
    let mut avps = Vec::new();
    while !data.is_empty() {
        if data.len() < 8 {
            return Err(DiameterError::Truncated("avp header"));
        }
        let code = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let flags = data[4];
        let len = u32::from_be_bytes([0, data[5], data[6], data[7]]) as usize;
        let (vendor_id, header) = if flags & FLAG_VENDOR != 0 {
            if data.len() < 12 {
                return Err(DiameterError::Truncated("avp vendor"));
            }
            (u32::from_be_bytes([data[8], data[9], data[10], data[11]]), 12)
        } else {
            (0, 8)
        };
        if len < header || len > data.len() {
            return Err(DiameterError::Truncated("avp length"));
        }
        let avp_type = dictionary::by_code(code, vendor_id).map(|d| d.avp_type);
        let payload = AvpData::decode(avp_type, &data[header..len])?;
        avps.push(Avp {
            code,
            flags,
            vendor_id,
            data: payload,
        });
        let next = (len + padding(len)).min(data.len());
        data = &data[next..];
    }
    Ok(avps)
}
