//! Context Assembler — builds a ranked Context Pack for one (expert, event) pair.
//!
//! Candidates come from the memory store, get a recency score relative to
//! the event's scheduled time, and are ranked by
//! `alpha * similarity + (1 - alpha) * recency`. The top K survive, with
//! ties going to the more recent record. Packs are built fresh per
//! invocation because alpha and K differ per expert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context_packer::source_provider::SharedKnowledgeSource;
use crate::event::Event;
use crate::memory::{blend, MemoryHit, RecencyDecay, SharedMemoryStore, StoreError};
use crate::registry::CategoryRegistry;

/// Default number of memories per pack.
pub const DEFAULT_TOP_K: usize = 10;

/// Default number of store hits requested before blending.
pub const DEFAULT_CANDIDATE_POOL: usize = 50;

/// Errors from context assembly.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("event not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid assembly parameter: {0}")]
    InvalidParameter(String),
}

/// Per-expert ranking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssemblyParams {
    /// Number of memories to keep.
    pub top_k: usize,
    /// Weight on similarity in [0, 1]; the remainder goes to recency.
    pub alpha: f64,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            alpha: 0.7,
        }
    }
}

impl AssemblyParams {
    pub fn validate(&self) -> Result<(), ContextError> {
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(ContextError::InvalidParameter(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// A memory selected for the pack, with its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMemory {
    pub record_id: String,
    pub event_ref: String,
    pub timestamp: DateTime<Utc>,
    pub similarity: f64,
    pub recency: f64,
    pub combined_score: f64,
}

/// Static knowledge about one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantKnowledge {
    pub participant: String,
    pub facts: Value,
}

/// Everything one expert sees for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub expert_id: String,
    pub event: Event,
    /// Ranked memories, best first, at most `top_k`.
    pub memories: Vec<RankedMemory>,
    pub knowledge: Vec<ParticipantKnowledge>,
    pub registry: CategoryRegistry,
    pub alpha: f64,
    pub top_k: usize,
    pub assembled_at: DateTime<Utc>,
}

/// Rank store hits by blended score.
///
/// Hits with a non-finite similarity or recency are dropped; similarities
/// are clamped to [-1, 1].
pub fn rank_hits(
    hits: Vec<MemoryHit>,
    decay: &RecencyDecay,
    as_of: DateTime<Utc>,
    params: AssemblyParams,
) -> Vec<RankedMemory> {
    let mut ranked: Vec<RankedMemory> = hits
        .into_iter()
        .filter_map(|hit| {
            if !hit.similarity.is_finite() {
                warn!(record_id = %hit.record_id, "dropping memory with non-finite similarity");
                return None;
            }
            let similarity = hit.similarity.clamp(-1.0, 1.0);
            let recency = decay.score(hit.timestamp, as_of);
            if !recency.is_finite() {
                warn!(
                    record_id = %hit.record_id,
                    tau_days = decay.tau_days,
                    "dropping memory with non-finite recency"
                );
                return None;
            }
            Some(RankedMemory {
                combined_score: blend(params.alpha, similarity, recency),
                record_id: hit.record_id,
                event_ref: hit.event_ref,
                timestamp: hit.timestamp,
                similarity,
                recency,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    ranked.truncate(params.top_k);
    ranked
}

/// Builds Context Packs from the memory store and knowledge source.
pub struct ContextAssembler {
    store: SharedMemoryStore,
    knowledge: SharedKnowledgeSource,
    decay: RecencyDecay,
    candidate_pool: usize,
}

impl ContextAssembler {
    pub fn new(store: SharedMemoryStore, knowledge: SharedKnowledgeSource) -> Self {
        Self {
            store,
            knowledge,
            decay: RecencyDecay::default(),
            candidate_pool: DEFAULT_CANDIDATE_POOL,
        }
    }

    pub fn with_decay(mut self, decay: RecencyDecay) -> Self {
        self.decay = decay;
        self
    }

    /// Number of store hits requested before blending (never below K).
    ///
    /// The store ranks its hits by similarity alone, so with a small pool and
    /// an alpha near 0 a fresh but dissimilar record can be cut before
    /// recency is ever scored. Raise the pool for recency-heavy experts.
    pub fn with_candidate_pool(mut self, candidate_pool: usize) -> Self {
        self.candidate_pool = candidate_pool;
        self
    }

    pub fn decay(&self) -> RecencyDecay {
        self.decay
    }

    /// Resolve an event id against the knowledge source.
    pub async fn resolve_event(&self, event_id: &str) -> Result<Event, ContextError> {
        self.knowledge
            .event(event_id)
            .await
            .ok_or_else(|| ContextError::NotFound(event_id.to_string()))
    }

    /// Assemble a pack for `expert_id` on the event `event_id`.
    pub async fn assemble(
        &self,
        expert_id: &str,
        event_id: &str,
        registry: &CategoryRegistry,
        params: AssemblyParams,
    ) -> Result<ContextPack, ContextError> {
        let event = self.resolve_event(event_id).await?;
        self.assemble_for(expert_id, &event, registry, params).await
    }

    /// Assemble a pack for an already-resolved event.
    pub async fn assemble_for(
        &self,
        expert_id: &str,
        event: &Event,
        registry: &CategoryRegistry,
        params: AssemblyParams,
    ) -> Result<ContextPack, ContextError> {
        params.validate()?;
        if !self.decay.is_valid() {
            return Err(ContextError::InvalidParameter(format!(
                "decay tau must be positive, got {}",
                self.decay.tau_days
            )));
        }

        let limit = self.candidate_pool.max(params.top_k);
        let hits = self.store.search(expert_id, event, limit).await?;
        let candidates = hits.len();
        let memories = rank_hits(hits, &self.decay, event.scheduled_at, params);

        let mut knowledge = Vec::with_capacity(2);
        for participant in event.participants() {
            if let Some(facts) = self.knowledge.participant_facts(participant).await {
                knowledge.push(ParticipantKnowledge {
                    participant: participant.to_string(),
                    facts,
                });
            }
        }

        debug!(
            expert_id,
            event_id = %event.id,
            candidates,
            selected = memories.len(),
            alpha = params.alpha,
            "context assembled"
        );

        Ok(ContextPack {
            expert_id: expert_id.to_string(),
            event: event.clone(),
            memories,
            knowledge,
            registry: registry.clone(),
            alpha: params.alpha,
            top_k: params.top_k,
            assembled_at: Utc::now(),
        })
    }
}
