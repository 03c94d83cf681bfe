// src/engine/mod.rs
//! Rating and CDR data exchanged with the rating engine and the CDR store.

pub mod call_cost;
pub mod call_descriptor;
pub mod cdr;
pub mod lcr;
pub mod session_run;

pub use call_cost::{CallCost, DebitInfo, Increment, Increments, TimeSpan, TriggerIds};
pub use call_descriptor::CallDescriptor;
pub use cdr::{AttrStoreSmCost, Cdr, SmCost};
pub use lcr::LcrCost;
pub use session_run::SessionRun;
