//! Clients for the external engines the charging core depends on:
//! - Responder: rating (max debit, debit, refunds, LCR)
//! - CdrsV1: CDR and session cost storage
//! - RLsV1: resource limiting
//! - PubSubV1: event publishing
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::cgrates::{CgratesClient, Responder};
//!
//! let client = CgratesClient::new("http://127.0.0.1:2080/jsonrpc", 2000)?;
//! let cc = client.max_debit(&cd).await?;
//! ```

mod cdrs;
mod client;
mod pubsub;
mod resources;
mod responder;
mod types;

pub use cdrs::CdrSink;
pub use client::CgratesClient;
pub use pubsub::EventPublisher;
pub use resources::ResourceLimiter;
pub use responder::Responder;
pub use types::*;

#[cfg(test)]
pub use cdrs::MockCdrSink;
#[cfg(test)]
pub use pubsub::MockEventPublisher;
#[cfg(test)]
pub use resources::MockResourceLimiter;
#[cfg(test)]
pub use responder::MockResponder;
