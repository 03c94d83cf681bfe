// src/lib.rs
//! Online charging engine: session charging core with Diameter, FreeSWITCH
//! and bidirectional JSON front ends plus offline CDR file mediation.

pub mod agents;
pub mod api;
pub mod cdrc;
pub mod cgrates;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod error;
pub mod esl;
pub mod guardian;
pub mod sessions;
pub mod structq;
pub mod utils;
