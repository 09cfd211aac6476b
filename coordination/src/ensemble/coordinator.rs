//! Council orchestrator - fans one event out to every expert and gathers
//! whatever comes back.
//!
//! Each expert runs in its own task: assemble context, then resolve through
//! the repair loop under the expert's timeout. One expert's failure or
//! timeout never touches another's in-flight work. Per-expert failures
//! become [`ExpertStatus`] values; only contract violations are returned
//! as errors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bundle::PredictionBundle;
use crate::config::{ConfigError, CouncilConfig, ExpertProfile};
use crate::context_packer::{ContextAssembler, SharedKnowledgeSource};
use crate::council::{ExpertError, ExpertRoster, MeteredExpert, SharedExpert};
use crate::event::Event;
use crate::feedback::{RepairConfig, RepairCoordinator, DEFAULT_FALLBACK_CONFIDENCE};
use crate::guardrails::GuardrailMeter;
use crate::memory::{RecencyDecay, SharedMemoryStore};
use crate::registry::CategoryRegistry;

use super::outcome::{ExpertOutcome, ExpertStatus, FailureReason, OrchestrationResult};
use super::standing::{ExpertStanding, SharedPerformanceTracker};
use super::voting::{ConsensusAggregator, ConsensusWeights};

/// Errors a caller must fix; never raised for expert misbehavior.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Expert {0} is not on the roster")]
    UnknownExpert(String),

    #[error("Expert {0} requested more than once")]
    DuplicateExpert(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Shared reference to an Orchestrator
pub type SharedOrchestrator = Arc<Orchestrator>;

/// Runs the council for one event at a time. Holds no per-run state, so
/// concurrent runs never share a meter.
pub struct Orchestrator {
    assembler: Arc<ContextAssembler>,
    roster: ExpertRoster,
    tracker: SharedPerformanceTracker,
    aggregator: ConsensusAggregator,
    fallback_confidence: f64,
}

impl Orchestrator {
    pub fn new(
        assembler: ContextAssembler,
        roster: ExpertRoster,
        tracker: SharedPerformanceTracker,
    ) -> Self {
        Self {
            assembler: Arc::new(assembler),
            roster,
            tracker,
            aggregator: ConsensusAggregator::default(),
            fallback_confidence: DEFAULT_FALLBACK_CONFIDENCE,
        }
    }

    /// Build from loaded configuration.
    pub fn from_config(
        config: &CouncilConfig,
        store: SharedMemoryStore,
        knowledge: SharedKnowledgeSource,
        roster: ExpertRoster,
        tracker: SharedPerformanceTracker,
    ) -> Self {
        let assembler = ContextAssembler::new(store, knowledge)
            .with_decay(RecencyDecay::new(config.context.decay_tau_days))
            .with_candidate_pool(config.context.candidate_pool);
        Self::new(assembler, roster, tracker)
            .with_consensus_weights(config.consensus)
            .with_fallback_confidence(config.fallback.confidence)
    }

    pub fn with_consensus_weights(mut self, weights: ConsensusWeights) -> Self {
        self.aggregator = ConsensusAggregator::new(weights);
        self
    }

    pub fn with_fallback_confidence(mut self, confidence: f64) -> Self {
        self.fallback_confidence = confidence;
        self
    }

    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(self)
    }

    /// Run the council named by `profiles` on `event_id`.
    pub async fn run(
        &self,
        event_id: &str,
        registry: Arc<CategoryRegistry>,
        profiles: &[ExpertProfile],
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let decay = self.assembler.decay();
        if !decay.is_valid() {
            return Err(ConfigError::invalid(
                "context.decay_tau_days",
                format!("must be positive, got {}", decay.tau_days),
            )
            .into());
        }

        let mut seen = HashSet::new();
        let mut seated: Vec<(ExpertProfile, SharedExpert)> = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if !seen.insert(profile.expert_id.as_str()) {
                return Err(OrchestrationError::DuplicateExpert(profile.expert_id.clone()));
            }
            profile.validate()?;
            let expert = self
                .roster
                .get(&profile.expert_id)
                .ok_or_else(|| OrchestrationError::UnknownExpert(profile.expert_id.clone()))?;
            seated.push((profile.clone(), expert));
        }

        let event = self
            .assembler
            .resolve_event(event_id)
            .await
            .map_err(|_| OrchestrationError::EventNotFound(event_id.to_string()))?;
        let event = Arc::new(event);

        let run_id = Uuid::new_v4().to_string();
        let meter = GuardrailMeter::new(run_id.clone()).shared();
        for (profile, _) in &seated {
            meter.register(profile.expert_id.clone(), profile.budget);
        }
        info!(
            run_id = %run_id,
            event_id,
            experts = seated.len(),
            "Orchestration started"
        );

        let standings = self.poll_standings(&run_id, &seated).await;

        let handles: Vec<_> = seated
            .into_iter()
            .map(|(profile, expert)| {
                let expert_id = profile.expert_id.clone();
                let pipeline = ExpertPipeline {
                    profile,
                    expert,
                    assembler: Arc::clone(&self.assembler),
                    event: Arc::clone(&event),
                    registry: Arc::clone(&registry),
                    meter: Arc::clone(&meter),
                    fallback_confidence: self.fallback_confidence,
                };
                (expert_id, tokio::spawn(pipeline.run()))
            })
            .collect();

        let joined = join_all(handles.into_iter().map(|(expert_id, handle)| async move {
            (expert_id, handle.await)
        }))
        .await;

        let mut per_expert = Vec::with_capacity(joined.len());
        let mut bundles = Vec::new();
        for (expert_id, result) in joined {
            match result {
                Ok(output) => {
                    per_expert.push(output.outcome);
                    bundles.extend(output.bundle);
                }
                Err(e) => {
                    error!(run_id = %run_id, expert_id = %expert_id, error = %e, "Expert pipeline panicked");
                    let mut outcome = ExpertOutcome::failed(expert_id, FailureReason::Unavailable, 0);
                    outcome.calls_used = meter.usage(&outcome.expert_id).map_or(0, |u| u.calls_used);
                    per_expert.push(outcome);
                }
            }
        }

        let council = self.aggregator.aggregate(&bundles, &standings, &registry);
        let degraded_service = !council.is_reached();
        if degraded_service {
            warn!(run_id = %run_id, event_id, "No consensus: no expert contributed");
        }
        info!(
            run_id = %run_id,
            event_id,
            contributors = bundles.len(),
            failed = per_expert.iter().filter(|o| o.status.is_failed()).count(),
            "Orchestration complete"
        );

        Ok(OrchestrationResult {
            run_id,
            event_id: event.id.clone(),
            per_expert,
            council,
            degraded_service,
        })
    }

    /// One standings poll per run. Unknown experts get a neutral standing.
    async fn poll_standings(
        &self,
        run_id: &str,
        seated: &[(ExpertProfile, SharedExpert)],
    ) -> HashMap<String, ExpertStanding> {
        let polls = seated.iter().map(|(profile, _)| {
            let tracker = Arc::clone(&self.tracker);
            let expert_id = profile.expert_id.clone();
            async move {
                let standing = tracker.get_standing(&expert_id).await;
                (expert_id, standing)
            }
        });

        join_all(polls)
            .await
            .into_iter()
            .map(|(expert_id, standing)| {
                let standing = standing.unwrap_or_else(|| {
                    warn!(run_id, expert_id = %expert_id, "No standing on record, using neutral");
                    ExpertStanding::NEUTRAL
                });
                (expert_id, standing)
            })
            .collect()
    }
}

/// Everything one expert's task owns.
struct ExpertPipeline {
    profile: ExpertProfile,
    expert: SharedExpert,
    assembler: Arc<ContextAssembler>,
    event: Arc<Event>,
    registry: Arc<CategoryRegistry>,
    meter: Arc<GuardrailMeter>,
    fallback_confidence: f64,
}

struct PipelineOutput {
    outcome: ExpertOutcome,
    /// Present only for success and degraded outcomes.
    bundle: Option<PredictionBundle>,
}

impl ExpertPipeline {
    async fn run(self) -> PipelineOutput {
        let started = Instant::now();
        let run_id = self.meter.run_id().to_string();
        let expert_id = self.profile.expert_id.clone();

        let pack = match self
            .assembler
            .assemble_for(
                &expert_id,
                &self.event,
                &self.registry,
                self.profile.assembly_params(),
            )
            .await
        {
            Ok(pack) => pack,
            Err(e) => {
                warn!(run_id = %run_id, expert_id = %expert_id, error = %e, "Context assembly failed");
                return self.failed(FailureReason::Unavailable, started);
            }
        };
        debug!(
            run_id = %run_id,
            expert_id = %expert_id,
            memories = pack.memories.len(),
            "Context assembled"
        );

        let metered = MeteredExpert::new(
            expert_id.clone(),
            Arc::clone(&self.expert),
            Arc::clone(&self.meter),
        );
        let coordinator = RepairCoordinator::new(RepairConfig {
            max_iterations: self.profile.max_repair_iterations,
            fallback_confidence: self.fallback_confidence,
        });

        // Dropping the future on timeout cancels the in-flight call; its
        // ticket still charges the time it held.
        let resolved =
            tokio::time::timeout(self.profile.timeout(), coordinator.resolve(&metered, &pack)).await;

        let resolution = match resolved {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(ExpertError::BudgetExhausted(denial))) => {
                warn!(run_id = %run_id, expert_id = %expert_id, denial = %denial, "Reservation denied");
                return self.failed(FailureReason::BudgetExhausted, started);
            }
            Ok(Err(e)) => {
                warn!(run_id = %run_id, expert_id = %expert_id, error = %e, "Expert unavailable");
                return self.failed(FailureReason::Unavailable, started);
            }
            Err(_) => {
                warn!(
                    run_id = %run_id,
                    expert_id = %expert_id,
                    timeout_ms = self.profile.timeout_ms,
                    "Expert timed out"
                );
                return self.failed(FailureReason::Timeout, started);
            }
        };

        let status = if resolution.degraded {
            ExpertStatus::Degraded
        } else {
            ExpertStatus::Success
        };
        let outcome = ExpertOutcome {
            expert_id: expert_id.clone(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            iterations_used: resolution.iterations_used,
            calls_used: self.calls_used(),
            repair_trail: resolution.trail,
        };
        info!(
            run_id = %run_id,
            expert_id = %expert_id,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            iterations_used = outcome.iterations_used,
            "Expert finished"
        );

        PipelineOutput {
            outcome,
            bundle: Some(resolution.bundle),
        }
    }

    fn calls_used(&self) -> u32 {
        self.meter
            .usage(&self.profile.expert_id)
            .map_or(0, |u| u.calls_used)
    }

    fn failed(&self, reason: FailureReason, started: Instant) -> PipelineOutput {
        let mut outcome = ExpertOutcome::failed(
            self.profile.expert_id.clone(),
            reason,
            started.elapsed().as_millis() as u64,
        );
        outcome.calls_used = self.calls_used();
        info!(
            run_id = %self.meter.run_id(),
            expert_id = %outcome.expert_id,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            "Expert finished"
        );
        PipelineOutput {
            outcome,
            bundle: None,
        }
    }
}
