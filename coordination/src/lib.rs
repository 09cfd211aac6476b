//! Expert Council Coordination Library
//!
//! This library provides:
//! - Recency-blended context assembly for each expert/event pair
//! - Per-run call and wall-clock guardrails
//! - Bundle validation with a bounded repair loop and safe fallback
//! - Concurrent, partial-failure tolerant orchestration of an expert council
//! - Standing-weighted consensus over the surviving bundles
//!
//! # Pipeline
//!
//! ```text
//! MemoryStore → ContextAssembler → Orchestrator → ExpertUnit
//!                                       │             │
//!                                       │    BundleValidator / RepairCoordinator
//!                                       ▼             │
//!                              ConsensusAggregator ◄──┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use council_coordination::{CouncilConfig, Orchestrator};
//!
//! let config = CouncilConfig::load("council.toml")?;
//! let orchestrator = Orchestrator::from_config(&config, store, knowledge, roster, standings);
//! let result = orchestrator.run("evt-1", registry, &config.profiles()?).await?;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod bundle;
pub mod config;
pub mod context_packer;
pub mod council;
pub mod ensemble;
pub mod event;
pub mod feedback;
pub mod guardrails;
pub mod memory;
pub mod registry;
pub mod verifier;

// Re-export the types most callers touch
pub use bundle::{BundleSummary, CategoryPrediction, PredictionBundle, PredictionValue, RationaleRef};
pub use config::{ConfigError, CouncilConfig, ExpertProfile};
pub use context_packer::{AssemblyParams, ContextAssembler, ContextError, ContextPack};
pub use council::{ExpertError, ExpertRoster, ExpertUnit, HttpExpert, SharedExpert};
pub use ensemble::{
    Consensus, CouncilBundle, ExpertOutcome, ExpertStanding, ExpertStatus, OrchestrationError,
    OrchestrationResult, Orchestrator, PerformanceTracker, StaticStandings,
};
pub use event::{EpisodicRecord, Event, EventFacts};
pub use feedback::{RepairCoordinator, Resolution};
pub use guardrails::{GuardrailBudget, GuardrailMeter};
pub use memory::{InMemoryStore, MemoryStore};
pub use registry::{CategoryDescriptor, CategoryRegistry, ConsistencyRule, RegistryError};
pub use verifier::{BundleValidator, ValidationReport, Violation};
