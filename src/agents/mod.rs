// src/agents/mod.rs
//! Protocol agents translating external charging requests into session operations.

pub mod diameter;

pub use diameter::{DiameterAgent, DiameterAgentConfig};
