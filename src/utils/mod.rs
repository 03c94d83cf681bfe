// src/utils/mod.rs
pub mod consts;
pub mod rsr;
pub mod template;
pub mod time;

pub use rsr::{parse_rsr_fields, RsrField, RsrFilter};
pub use template::{FieldSource, FieldTemplate};
pub use time::{duration_ns, parse_duration_with_secs, parse_time};

use sha2::{Digest, Sha256};

/// Hex SHA-256 over the concatenated parts.
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn gen_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
