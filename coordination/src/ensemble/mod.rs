//! Expert council orchestration and consensus
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      Orchestrator                          │
//! │  • Resolves the event, creates the run's GuardrailMeter    │
//! │  • Polls standings once                                    │
//! │  • Spawns one pipeline task per expert                     │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!           ┌───────────────┼───────────────┐
//!           ▼               ▼               ▼
//!     ┌───────────┐   ┌───────────┐   ┌───────────┐
//!     │ assemble  │   │ assemble  │   │ assemble  │
//!     │ → repair  │   │ → repair  │   │ → repair  │   (per-expert timeout)
//!     │   loop    │   │   loop    │   │   loop    │
//!     └─────┬─────┘   └─────┬─────┘   └─────┬─────┘
//!           └───────────────┼───────────────┘
//!                           ▼
//!                 ┌───────────────────┐
//!                 │ConsensusAggregator│
//!                 └───────────────────┘
//! ```
//!
//! # Components
//!
//! - **Orchestrator**: fan-out, timeouts, per-expert status
//! - **ConsensusAggregator**: standing-weighted vote over validated bundles
//! - **PerformanceTracker**: read-only standings source
//!
//! # Usage
//!
//! ```ignore
//! use council_coordination::ensemble::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(assembler, roster, standings);
//! let result = orchestrator.run("evt-1", registry, &profiles).await?;
//! for outcome in &result.per_expert {
//!     println!("{} {}", outcome.expert_id, outcome.status);
//! }
//! ```

pub mod coordinator;
pub mod outcome;
pub mod standing;
pub mod voting;

pub use coordinator::{OrchestrationError, Orchestrator, SharedOrchestrator};
pub use outcome::{ExpertOutcome, ExpertStatus, FailureReason, OrchestrationResult};
pub use standing::{ExpertStanding, PerformanceTracker, SharedPerformanceTracker, StaticStandings};
pub use voting::{
    Consensus, ConsensusAggregator, ConsensusWeights, CouncilBundle, CouncilPrediction,
    ExpertWeight,
};
