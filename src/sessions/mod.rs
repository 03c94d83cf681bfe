//! Session charging core.
//!
//! - `event`: generic event map every adapter projects onto
//! - `session`: one derived run with its debit loop
//! - `manager`: registry, index, TTL terminators and lifecycle operations
//! - `birpc`: `SMGenericV1.*` method table

pub mod active;
pub mod birpc;
pub mod connections;
pub mod event;
pub mod index;
pub mod manager;
pub mod session;
pub mod terminator;

pub use active::ActiveSession;
pub use birpc::BiRpcDispatcher;
pub use connections::{AttrDisconnectSession, ClientConnection, ExternalConnections};
pub use event::{EventDefaults, GenericEvent};
pub use manager::{SessionManager, SessionManagerConfig};
pub use session::{Session, SessionContext};
