//! Resource limiter seam used by the FreeSWITCH adapter.

use async_trait::async_trait;
use tracing::instrument;

use super::client::CgratesClient;
use super::types::ResourceUsageArgs;
use crate::error::ChargingError;

/// Remote resource limiter (`RLsV1.*`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceLimiter: Send + Sync {
    /// Fails with `ResourceUnavailable` when the admission is refused.
    async fn initiate_resource_usage(&self, args: &ResourceUsageArgs) -> Result<(), ChargingError>;

    async fn terminate_resource_usage(&self, args: &ResourceUsageArgs) -> Result<(), ChargingError>;
}

#[async_trait]
impl ResourceLimiter for CgratesClient {
    #[instrument(skip(self, args), fields(usage_id = %args.usage_id))]
    async fn initiate_resource_usage(&self, args: &ResourceUsageArgs) -> Result<(), ChargingError> {
        self.call_ok("RLsV1.InitiateResourceUsage", args).await
    }

    #[instrument(skip(self, args), fields(usage_id = %args.usage_id))]
    async fn terminate_resource_usage(&self, args: &ResourceUsageArgs) -> Result<(), ChargingError> {
        self.call_ok("RLsV1.TerminateResourceUsage", args).await
    }
}
