//! Rating engine seam used by the session core.

use async_trait::async_trait;
use tracing::instrument;

use super::client::CgratesClient;
use super::types::AttrGetLcr;
use crate::engine::{CallCost, CallDescriptor, Cdr, LcrCost, SessionRun};
use crate::error::ChargingError;

/// Remote rating engine (`Responder.*`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Responder: Send + Sync {
    async fn get_session_runs(&self, event: &Cdr) -> Result<Vec<SessionRun>, ChargingError>;

    /// Seconds; `-1` means unlimited.
    async fn get_derived_max_session_time(&self, event: &Cdr) -> Result<f64, ChargingError>;

    async fn max_debit(&self, cd: &CallDescriptor) -> Result<CallCost, ChargingError>;

    async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, ChargingError>;

    async fn refund_increments(&self, cd: &CallDescriptor) -> Result<f64, ChargingError>;

    async fn get_lcr(&self, cd: &CallDescriptor) -> Result<LcrCost, ChargingError>;
}

#[async_trait]
impl Responder for CgratesClient {
    #[instrument(skip(self, event), fields(origin_id = %event.origin_id))]
    async fn get_session_runs(&self, event: &Cdr) -> Result<Vec<SessionRun>, ChargingError> {
        self.call("Responder.GetSessionRuns", event).await
    }

    #[instrument(skip(self, event), fields(origin_id = %event.origin_id))]
    async fn get_derived_max_session_time(&self, event: &Cdr) -> Result<f64, ChargingError> {
        self.call("Responder.GetDerivedMaxSessionTime", event).await
    }

    #[instrument(skip(self, cd), fields(unique_id = %cd.unique_id, loop_index = cd.loop_index))]
    async fn max_debit(&self, cd: &CallDescriptor) -> Result<CallCost, ChargingError> {
        self.call("Responder.MaxDebit", cd).await
    }

    #[instrument(skip(self, cd), fields(unique_id = %cd.unique_id))]
    async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, ChargingError> {
        self.call("Responder.Debit", cd).await
    }

    #[instrument(skip(self, cd), fields(unique_id = %cd.unique_id, increments = cd.increments.len()))]
    async fn refund_increments(&self, cd: &CallDescriptor) -> Result<f64, ChargingError> {
        self.call("Responder.RefundIncrements", cd).await
    }

    #[instrument(skip(self, cd), fields(destination = %cd.destination))]
    async fn get_lcr(&self, cd: &CallDescriptor) -> Result<LcrCost, ChargingError> {
        self.call(
            "Responder.GetLCR",
            AttrGetLcr {
                call_descriptor: cd,
                paginator: None,
            },
        )
        .await
    }
}
