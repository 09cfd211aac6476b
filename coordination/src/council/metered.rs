//! Expert wrapper that routes every call through the run's guardrail meter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bundle::PredictionBundle;
use crate::context_packer::ContextPack;
use crate::guardrails::GuardrailMeter;
use crate::verifier::Violation;

use super::{ExpertError, ExpertUnit, SharedExpert};

/// Wraps an expert so each `predict`/`repair` reserves one call first.
///
/// Elapsed time is charged when the call returns or is dropped mid-flight.
pub struct MeteredExpert {
    expert_id: String,
    inner: SharedExpert,
    meter: Arc<GuardrailMeter>,
}

impl MeteredExpert {
    pub fn new(expert_id: impl Into<String>, inner: SharedExpert, meter: Arc<GuardrailMeter>) -> Self {
        Self {
            expert_id: expert_id.into(),
            inner,
            meter,
        }
    }
}

#[async_trait]
impl ExpertUnit for MeteredExpert {
    async fn predict(&self, pack: &ContextPack) -> Result<PredictionBundle, ExpertError> {
        let _ticket = self
            .meter
            .begin_call(&self.expert_id)
            .map_err(ExpertError::BudgetExhausted)?;
        debug!(expert_id = %self.expert_id, "predict");
        self.inner.predict(pack).await
    }

    async fn repair(
        &self,
        pack: &ContextPack,
        prior: &PredictionBundle,
        violations: &[Violation],
    ) -> Result<PredictionBundle, ExpertError> {
        let _ticket = self
            .meter
            .begin_call(&self.expert_id)
            .map_err(ExpertError::BudgetExhausted)?;
        debug!(
            expert_id = %self.expert_id,
            violations = violations.len(),
            "repair"
        );
        self.inner.repair(pack, prior, violations).await
    }
}
