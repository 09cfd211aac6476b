//! Expert council members — the opaque prediction capability.
//!
//! An expert exposes exactly two operations, `predict` and `repair`. How it
//! reasons is its own business; anything honoring the contract can sit on
//! the council, which is what lets tests seat deterministic mock experts.

pub mod http;
pub mod metered;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::bundle::PredictionBundle;
use crate::context_packer::ContextPack;
use crate::guardrails::ReservationDenial;
use crate::verifier::Violation;

pub use http::HttpExpert;
pub use metered::MeteredExpert;

/// Errors from expert calls.
#[derive(Debug, Clone, Error)]
pub enum ExpertError {
    #[error("expert unavailable: {0}")]
    Unavailable(String),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(ReservationDenial),

    #[error("malformed expert response: {0}")]
    Malformed(String),
}

/// Trait for council members.
#[async_trait]
pub trait ExpertUnit: Send + Sync {
    /// Produce a bundle from a context pack.
    async fn predict(&self, pack: &ContextPack) -> Result<PredictionBundle, ExpertError>;

    /// Correct `prior` so that it no longer exhibits `violations`.
    async fn repair(
        &self,
        pack: &ContextPack,
        prior: &PredictionBundle,
        violations: &[Violation],
    ) -> Result<PredictionBundle, ExpertError>;
}

/// Shared reference to an expert.
pub type SharedExpert = Arc<dyn ExpertUnit>;

/// Experts available for a run, keyed by id.
#[derive(Clone, Default)]
pub struct ExpertRoster {
    experts: BTreeMap<String, SharedExpert>,
}

impl ExpertRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expert(mut self, expert_id: impl Into<String>, expert: SharedExpert) -> Self {
        self.insert(expert_id, expert);
        self
    }

    pub fn insert(&mut self, expert_id: impl Into<String>, expert: SharedExpert) {
        self.experts.insert(expert_id.into(), expert);
    }

    pub fn get(&self, expert_id: &str) -> Option<SharedExpert> {
        self.experts.get(expert_id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.experts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.experts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }
}

impl std::fmt::Debug for ExpertRoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpertRoster")
            .field("experts", &self.experts.keys().collect::<Vec<_>>())
            .finish()
    }
}
