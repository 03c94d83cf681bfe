//! Event publishing seam (`PubSubV1.Publish`).

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::client::CgratesClient;
use crate::error::ChargingError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &HashMap<String, String>) -> Result<(), ChargingError>;
}

#[async_trait]
impl EventPublisher for CgratesClient {
    #[instrument(skip(self, event))]
    async fn publish(&self, event: &HashMap<String, String>) -> Result<(), ChargingError> {
        self.call_ok("PubSubV1.Publish", event).await?;
        debug!("Event published with {} fields", event.len());
        Ok(())
    }
}
