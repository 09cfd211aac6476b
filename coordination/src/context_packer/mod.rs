//! Context Packer — ranked, per-expert Context Packs
//!
//! Blends memory similarity with recency to choose the historical context
//! each expert sees, and bundles it with participant knowledge and the
//! category registry.

pub mod packer;
pub mod source_provider;

pub use packer::{
    rank_hits, AssemblyParams, ContextAssembler, ContextError, ContextPack, ParticipantKnowledge,
    RankedMemory, DEFAULT_CANDIDATE_POOL, DEFAULT_TOP_K,
};
pub use source_provider::{KnowledgeSource, SharedKnowledgeSource, StaticKnowledge};
