// src/sessions/connections.rs
//! Registry of bidirectional client connections so that server initiated
//! calls (session disconnects) can be routed back to the right peer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::event::GenericEvent;
use crate::error::ChargingError;
use crate::utils::gen_uuid;

/// Arguments of `SMGClientV1.DisconnectSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrDisconnectSession {
    #[serde(rename = "EventStart")]
    pub event_start: GenericEvent,

    #[serde(rename = "Reason")]
    pub reason: String,
}

/// A peer able to receive server initiated calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientConnection: Send + Sync {
    /// Returns the peer's reply, `OK` on success.
    async fn disconnect_session(&self, args: &AttrDisconnectSession) -> Result<String, ChargingError>;
}

#[derive(Default)]
pub struct ExternalConnections {
    conns: RwLock<HashMap<String, Arc<dyn ClientConnection>>>,
}

impl ExternalConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under a fresh id.
    pub async fn add(&self, conn: Arc<dyn ClientConnection>) -> String {
        let id = gen_uuid();
        self.conns.write().await.insert(id.clone(), conn);
        info!("🔌 Client connection registered: {}", id);
        id
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ClientConnection>> {
        self.conns.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        if self.conns.write().await.remove(id).is_some() {
            debug!("Client connection removed: {}", id);
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        self.conns.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = ExternalConnections::new();
        let mut mock = MockClientConnection::new();
        mock.expect_disconnect_session()
            .returning(|_| Ok("OK".to_string()));
        let id = registry.add(Arc::new(mock)).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.ids().await, vec![id.clone()]);

        let conn = registry.get(&id).await.unwrap();
        let reply = conn
            .disconnect_session(&AttrDisconnectSession {
                event_start: GenericEvent::new(),
                reason: "INSUFFICIENT_FUNDS".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, "OK");

        registry.remove(&id).await;
        assert!(registry.get(&id).await.is_none());
    }
}
