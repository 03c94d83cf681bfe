//! CDR store seam.

use async_trait::async_trait;
use tracing::{info, instrument};

use super::client::CgratesClient;
use crate::engine::{AttrStoreSmCost, Cdr};
use crate::error::ChargingError;

/// Remote CDR store (`CdrsV1.*`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CdrSink: Send + Sync {
    async fn process_cdr(&self, cdr: &Cdr) -> Result<(), ChargingError>;

    /// Fails with `Exists` when `check_duplicate` finds a stored cost.
    async fn store_sm_cost(&self, attr: &AttrStoreSmCost) -> Result<(), ChargingError>;
}

#[async_trait]
impl CdrSink for CgratesClient {
    #[instrument(skip(self, cdr), fields(cgrid = %cdr.cgr_id, origin_id = %cdr.origin_id))]
    async fn process_cdr(&self, cdr: &Cdr) -> Result<(), ChargingError> {
        self.call_ok("CdrsV1.ProcessCDR", cdr).await?;
        info!("✅ CDR posted: {}", cdr.origin_id);
        Ok(())
    }

    #[instrument(skip(self, attr), fields(unique_id = %attr.cost.unique_id, run_id = %attr.cost.run_id))]
    async fn store_sm_cost(&self, attr: &AttrStoreSmCost) -> Result<(), ChargingError> {
        self.call_ok("CdrsV1.StoreSMCost", attr).await
    }
}
