// src/agents/diameter/processor.rs
//! Request processor chain: every configured processor whose filters match
//! turns the CCR into a session operation and shapes the answer.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::ccr::{
    Ccr, ProcessorVars, CGR_ERROR, CGR_MAX_USAGE, CGR_RESULT_CODE, REQUEST_EVENT, REQUEST_INITIAL,
    REQUEST_TERMINATE, REQUEST_UPDATE,
};
use super::codec::DiameterError;
use super::dictionary::{DIAMETER_LIMITED_SUCCESS, DIAMETER_RATING_FAILED, DIAMETER_SUCCESS};
use super::message::Message;
use super::DiameterAgentConfig;
use crate::cgrates::EventPublisher;
use crate::error::ChargingError;
use crate::sessions::{GenericEvent, SessionManager};
use crate::utils::consts::{CGR_FLAGS, INFIELD_SEP, USAGE};
use crate::utils::template::{deserialize_rsr_fields, FieldTemplate};
use crate::utils::time::duration_secs;
use crate::utils::RsrField;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestProcessor {
    pub id: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub publish_event: bool,
    #[serde(default, deserialize_with = "deserialize_rsr_fields")]
    pub request_filter: Vec<RsrField>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub continue_on_success: bool,
    #[serde(default)]
    pub append_cca: bool,
    #[serde(default)]
    pub ccr_fields: Vec<FieldTemplate>,
    #[serde(default)]
    pub cca_fields: Vec<FieldTemplate>,
}

enum Step {
    /// Filters did not match.
    Skipped,
    Processed,
    /// Answer carries the rating failed result code; stop the chain.
    RatingFailed,
}

/// Errors whose text the answer templates may want to show; everything
/// else is a rating failure.
fn is_user_error(e: &ChargingError) -> bool {
    matches!(
        e,
        ChargingError::AccountNotFound
            | ChargingError::UserNotFound
            | ChargingError::InsufficientCredit
            | ChargingError::AccountDisabled
            | ChargingError::RatingPlanNotFound
            | ChargingError::UnauthorizedDestination
    )
}

pub struct CcrProcessor {
    cfg: Arc<DiameterAgentConfig>,
    sessions: Arc<SessionManager>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl CcrProcessor {
    pub fn new(
        cfg: Arc<DiameterAgentConfig>,
        sessions: Arc<SessionManager>,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Self {
        Self {
            cfg,
            sessions,
            publisher,
        }
    }

    pub fn config(&self) -> &DiameterAgentConfig {
        &self.cfg
    }

    /// Runs the processor chain; `None` means no answer should be sent.
    pub async fn handle(&self, request: Message) -> Option<Message> {
        let ccr = match Ccr::from_message(request, self.cfg.debit_interval) {
            Ok(c) => c,
            Err(e) => {
                error!("❌ Unmarshaling CCR: {}", e);
                return None;
            }
        };
        let mut cca = match self.bare_cca(&ccr) {
            Ok(m) => m,
            Err(e) => {
                error!("❌ Building CCA for {}: {}", ccr.session_id, e);
                return None;
            }
        };
        let mut vars = ProcessorVars::new();
        let mut processed = false;
        for rp in &self.cfg.request_processors {
            match self.process(&ccr, rp, &mut vars, &mut cca).await {
                Ok(Step::Skipped) => {}
                Ok(Step::Processed) => {
                    processed = true;
                    if !rp.continue_on_success {
                        break;
                    }
                }
                Ok(Step::RatingFailed) => {
                    processed = true;
                    break;
                }
                Err(e) => {
                    error!("❌ CCA processing for {}: {}", ccr.session_id, e);
                    return None;
                }
            }
        }
        if !processed {
            warn!(
                "⚠️ No request processor enabled for CCR, ignoring request {}",
                ccr.session_id
            );
            return None;
        }
        Some(cca)
    }

    fn bare_cca(&self, ccr: &Ccr) -> Result<Message, DiameterError> {
        ccr.bare_cca(&self.cfg.origin_host, &self.cfg.origin_realm)
    }

    fn rating_failed(&self, ccr: &Ccr, cca: &mut Message) -> Result<Step, DiameterError> {
        *cca = self.bare_cca(ccr)?;
        cca.set_with_path(&["Result-Code"], &DIAMETER_RATING_FAILED.to_string(), false)?;
        Ok(Step::RatingFailed)
    }

    async fn process(
        &self,
        ccr: &Ccr,
        rp: &RequestProcessor,
        vars: &mut ProcessorVars,
        cca: &mut Message,
    ) -> Result<Step, DiameterError> {
        if !ccr.passes_filters(&rp.request_filter, vars) {
            return Ok(Step::Skipped);
        }
        if rp.dry_run {
            info!("RequestProcessor: {}", rp.id);
            info!("CCR message: {:?}", ccr.message);
        }
        if !rp.append_cca {
            *cca = self.bare_cca(ccr)?;
        }
        let mut event = match ccr.as_event(&rp.ccr_fields, vars) {
            Ok(ev) => ev,
            Err(e) => {
                error!("❌ Processing CCR {} with {}: {}", ccr.session_id, rp.id, e);
                return self.rating_failed(ccr, cca);
            }
        };
        if !rp.flags.is_empty() {
            event.set(CGR_FLAGS, rp.flags.join(INFIELD_SEP));
        }
        if rp.publish_event {
            if let Err(e) = self.publish(&event).await {
                error!("❌ Publishing event of {}: {}", ccr.session_id, e);
                return self.rating_failed(ccr, cca);
            }
        }

        vars.insert(CGR_RESULT_CODE.to_string(), DIAMETER_SUCCESS.to_string());
        vars.insert(CGR_ERROR.to_string(), String::new());
        if rp.dry_run {
            info!("Generic event: {:?}", event);
            vars.insert(CGR_RESULT_CODE.to_string(), DIAMETER_LIMITED_SUCCESS.to_string());
        } else {
            let (max_usage, result) = self.dispatch(ccr.request_type, event).await;
            if let Err(e) = result {
                error!("❌ Processing CCR {}: {}", ccr.session_id, e);
                vars.insert(CGR_ERROR.to_string(), e.to_string());
                if !is_user_error(&e) {
                    vars.insert(CGR_RESULT_CODE.to_string(), DIAMETER_RATING_FAILED.to_string());
                }
            }
            let mut max_usage = max_usage.max(0.0);
            if let Some(prev) = vars.get(CGR_MAX_USAGE).and_then(|v| v.parse::<f64>().ok()) {
                max_usage = max_usage.min(prev);
            }
            vars.insert(CGR_MAX_USAGE.to_string(), max_usage.to_string());
        }

        let result_code = vars.get(CGR_RESULT_CODE).cloned().unwrap_or_default();
        cca.set_with_path(&["Result-Code"], &result_code, false)?;
        if let Err(e) = ccr.set_cca_fields(cca, &rp.cca_fields, vars) {
            error!("❌ CCA fields of {}: {}", rp.id, e);
            return self.rating_failed(ccr, cca);
        }
        Ok(Step::Processed)
    }

    async fn publish(&self, event: &GenericEvent) -> Result<(), ChargingError> {
        match &self.publisher {
            Some(p) => {
                let flat = event
                    .0
                    .keys()
                    .map(|k| (k.clone(), event.field_as_string(k)))
                    .collect();
                p.publish(&flat).await
            }
            None => {
                debug!("No event publisher configured");
                Ok(())
            }
        }
    }

    /// Max usage in seconds and the outcome of the session operation.
    async fn dispatch(&self, request_type: u32, mut event: GenericEvent) -> (f64, Result<(), ChargingError>) {
        let sm = &self.sessions;
        match request_type {
            REQUEST_INITIAL => match sm.initiate_session(event, None).await {
                Ok(d) => (duration_secs(d), Ok(())),
                Err(e) => (0.0, Err(e)),
            },
            REQUEST_UPDATE => match sm.update_session(event, None).await {
                Ok(d) => (duration_secs(d), Ok(())),
                Err(e) => (0.0, Err(e)),
            },
            REQUEST_TERMINATE | REQUEST_EVENT => {
                let (max_usage, mut result) = if request_type == REQUEST_TERMINATE {
                    (0.0, sm.terminate_session(event.clone(), None).await)
                } else {
                    match sm.charge_event(event.clone()).await {
                        Ok(d) => {
                            if d.is_zero() {
                                event.set(USAGE, 0);
                            }
                            (duration_secs(d), Ok(()))
                        }
                        Err(e) => {
                            event.set(USAGE, 0);
                            (0.0, Err(e))
                        }
                    }
                };
                let session_missing = matches!(result, Err(ChargingError::NoActiveSession));
                if self.cfg.create_cdr && (!self.cfg.cdr_requires_session || !session_missing) {
                    if let Err(e) = sm.process_cdr(event).await {
                        result = Err(e);
                    }
                }
                (max_usage, result)
            }
            other => (
                0.0,
                Err(ChargingError::Unsupported(format!("CC-Request-Type {}", other))),
            ),
        }
    }
}
