//! Bounded draft/validate/repair cycle for one expert.
//!
//! ```text
//! Draft → Validate ─┬─ valid ───────────────────────────→ Accept
//!                   └─ invalid → Repair → Validate ─┬─ …
//!                                                   └─ iterations spent → Fallback
//! ```
//!
//! A bundle that never validates is not an error: the expert is recorded
//! as degraded with a safe fallback bundle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bundle::PredictionBundle;
use crate::context_packer::ContextPack;
use crate::council::{ExpertError, ExpertUnit};
use crate::verifier::{BundleValidator, ValidationReport};

use super::fallback::{safe_bundle, DEFAULT_FALLBACK_CONFIDENCE};

/// Default number of repair calls after the initial draft.
pub const DEFAULT_MAX_REPAIR_ITERATIONS: u32 = 2;

/// Phase of a repair cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPhase {
    /// Waiting on the initial prediction.
    Draft,
    /// Checking the current bundle.
    Validate,
    /// Waiting on a corrected bundle.
    Repair,
    /// A bundle validated.
    Accept,
    /// Repairs exhausted; safe bundle substituted.
    Fallback,
}

impl RepairPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accept | Self::Fallback)
    }

    pub fn valid_transitions(self) -> &'static [RepairPhase] {
        match self {
            Self::Draft => &[Self::Validate],
            Self::Validate => &[Self::Accept, Self::Repair, Self::Fallback],
            Self::Repair => &[Self::Validate, Self::Fallback],
            Self::Accept | Self::Fallback => &[],
        }
    }

    pub fn can_transition_to(self, next: RepairPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for RepairPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Validate => write!(f, "validate"),
            Self::Repair => write!(f, "repair"),
            Self::Accept => write!(f, "accept"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Repair loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    pub max_iterations: u32,
    pub fallback_confidence: f64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_REPAIR_ITERATIONS,
            fallback_confidence: DEFAULT_FALLBACK_CONFIDENCE,
        }
    }
}

/// Terminal outcome of a repair cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The accepted bundle, or the fallback when `degraded`.
    pub bundle: PredictionBundle,
    /// Repair calls that returned a bundle.
    pub iterations_used: u32,
    pub degraded: bool,
    /// One report per validation, oldest first.
    pub trail: Vec<ValidationReport>,
    /// Phases visited, ending in `Accept` or `Fallback`.
    pub phases: Vec<RepairPhase>,
}

/// Drives one expert through the repair cycle.
#[derive(Debug, Clone, Default)]
pub struct RepairCoordinator {
    validator: BundleValidator,
    config: RepairConfig,
}

struct PhaseTracker {
    current: RepairPhase,
    visited: Vec<RepairPhase>,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            current: RepairPhase::Draft,
            visited: vec![RepairPhase::Draft],
        }
    }

    fn advance(&mut self, next: RepairPhase) {
        debug_assert!(
            self.current.can_transition_to(next),
            "invalid repair transition {} -> {}",
            self.current,
            next
        );
        self.current = next;
        self.visited.push(next);
    }
}

impl RepairCoordinator {
    pub fn new(config: RepairConfig) -> Self {
        Self {
            validator: BundleValidator::new(),
            config,
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Run the cycle for `pack.expert_id`.
    ///
    /// Returns `Err` only when the expert itself fails: unavailable, a
    /// malformed response, or a budget denial on the initial draft. A
    /// budget denial during repair ends the cycle in `Fallback`.
    pub async fn resolve(
        &self,
        expert: &dyn ExpertUnit,
        pack: &ContextPack,
    ) -> Result<Resolution, ExpertError> {
        let mut phases = PhaseTracker::new();
        let mut trail = Vec::new();
        let mut iterations_used = 0u32;

        let mut bundle = expert.predict(pack).await?;
        stamp(&mut bundle, pack);

        loop {
            phases.advance(RepairPhase::Validate);
            let report = self.validator.validate(&bundle, &pack.registry);
            let valid = report.is_valid();
            let violations = report.violations.clone();
            trail.push(report);

            if valid {
                phases.advance(RepairPhase::Accept);
                info!(
                    expert_id = %pack.expert_id,
                    iterations_used,
                    "bundle accepted"
                );
                return Ok(Resolution {
                    bundle,
                    iterations_used,
                    degraded: false,
                    trail,
                    phases: phases.visited,
                });
            }

            if iterations_used >= self.config.max_iterations {
                warn!(
                    expert_id = %pack.expert_id,
                    iterations_used,
                    violations = violations.len(),
                    "repair iterations exhausted"
                );
                break;
            }

            phases.advance(RepairPhase::Repair);
            debug!(
                expert_id = %pack.expert_id,
                iteration = iterations_used + 1,
                violations = violations.len(),
                "requesting repair"
            );
            match expert.repair(pack, &bundle, &violations).await {
                Ok(mut repaired) => {
                    iterations_used += 1;
                    stamp(&mut repaired, pack);
                    bundle = repaired;
                }
                Err(ExpertError::BudgetExhausted(denial)) => {
                    warn!(
                        expert_id = %pack.expert_id,
                        iterations_used,
                        denial = %denial,
                        "repair denied by guardrails"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        phases.advance(RepairPhase::Fallback);
        let fallback = safe_bundle(
            &pack.registry,
            &pack.expert_id,
            &pack.event.id,
            self.config.fallback_confidence,
        );
        Ok(Resolution {
            bundle: fallback,
            iterations_used,
            degraded: true,
            trail,
            phases: phases.visited,
        })
    }
}

/// Bundles are attributed to the expert and event they were requested for.
fn stamp(bundle: &mut PredictionBundle, pack: &ContextPack) {
    if bundle.expert_id != pack.expert_id || bundle.event_id != pack.event.id {
        debug!(
            expert_id = %pack.expert_id,
            returned_expert = %bundle.expert_id,
            returned_event = %bundle.event_id,
            "re-attributing bundle"
        );
        bundle.expert_id = pack.expert_id.clone();
        bundle.event_id = pack.event.id.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleSummary, CategoryPrediction, PredictionValue};
    use crate::event::Event;
    use crate::guardrails::ReservationDenial;
    use crate::registry::{CategoryDescriptor, CategoryRegistry, ConsistencyRule};
    use crate::verifier::Violation;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Expert that replays scripted responses and records repair requests.
    struct ScriptedExpert {
        responses: Mutex<VecDeque<Result<PredictionBundle, ExpertError>>>,
        repair_requests: Mutex<Vec<Vec<Violation>>>,
    }

    impl ScriptedExpert {
        fn new(responses: Vec<Result<PredictionBundle, ExpertError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                repair_requests: Mutex::new(Vec::new()),
            }
        }

        fn next(&self) -> Result<PredictionBundle, ExpertError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ExpertError::Unavailable("script exhausted".into())))
        }
    }

    #[async_trait]
    impl ExpertUnit for ScriptedExpert {
        async fn predict(&self, _pack: &ContextPack) -> Result<PredictionBundle, ExpertError> {
            self.next()
        }

        async fn repair(
            &self,
            _pack: &ContextPack,
            _prior: &PredictionBundle,
            violations: &[Violation],
        ) -> Result<PredictionBundle, ExpertError> {
            self.repair_requests.lock().unwrap().push(violations.to_vec());
            self.next()
        }
    }

    fn pack() -> ContextPack {
        let registry = CategoryRegistry::new(
            vec![
                CategoryDescriptor::enumerated("winner", ["home", "away"]),
                CategoryDescriptor::numeric("q1"),
                CategoryDescriptor::numeric("q2"),
                CategoryDescriptor::numeric("q3"),
                CategoryDescriptor::numeric("total"),
            ],
            vec![ConsistencyRule::sum(&["q1", "q2", "q3"], "total")],
            "winner",
        )
        .unwrap();
        let scheduled = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
        ContextPack {
            expert_id: "sharp".into(),
            event: Event::new("evt-1", "home", "away", scheduled),
            memories: vec![],
            knowledge: vec![],
            registry,
            alpha: 0.7,
            top_k: 10,
            assembled_at: scheduled,
        }
    }

    fn quarters(q: [f64; 3], total: f64) -> PredictionBundle {
        let num = |id: &str, v: f64| CategoryPrediction::new(id, PredictionValue::Numeric(v), 0.6);
        PredictionBundle {
            expert_id: "sharp".into(),
            event_id: "evt-1".into(),
            predictions: vec![
                CategoryPrediction::new("winner", PredictionValue::Enumerated("home".into()), 0.7),
                num("q1", q[0]),
                num("q2", q[1]),
                num("q3", q[2]),
                num("total", total),
            ],
            summary: BundleSummary {
                primary_outcome: "home".into(),
                outcome_probability: 0.6,
                aggregate_confidence: 0.7,
            },
        }
    }

    #[test]
    fn test_phase_transitions() {
        assert!(RepairPhase::Draft.can_transition_to(RepairPhase::Validate));
        assert!(!RepairPhase::Draft.can_transition_to(RepairPhase::Accept));
        assert!(RepairPhase::Repair.can_transition_to(RepairPhase::Fallback));
        assert!(RepairPhase::Accept.is_terminal());
        assert!(RepairPhase::Fallback.valid_transitions().is_empty());
    }

    #[tokio::test]
    async fn test_valid_draft_is_accepted_without_repair() {
        let expert = ScriptedExpert::new(vec![Ok(quarters([7.0, 7.0, 7.0], 21.0))]);
        let resolution = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap();

        assert!(!resolution.degraded);
        assert_eq!(resolution.iterations_used, 0);
        assert_eq!(resolution.trail.len(), 1);
        assert_eq!(
            resolution.phases,
            vec![RepairPhase::Draft, RepairPhase::Validate, RepairPhase::Accept]
        );
        assert!(expert.repair_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quarter_sum_repaired_in_one_iteration() {
        let expert = ScriptedExpert::new(vec![
            Ok(quarters([7.0, 7.0, 7.0], 14.0)),
            Ok(quarters([7.0, 7.0, 0.0], 14.0)),
        ]);
        let resolution = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap();

        assert!(!resolution.degraded);
        assert_eq!(resolution.iterations_used, 1);
        assert_eq!(resolution.trail.len(), 2);
        assert!(!resolution.trail[0].is_valid());
        assert!(resolution.trail[1].is_valid());
        assert_eq!(resolution.bundle.prediction("q3").unwrap().value.as_numeric(), Some(0.0));

        let requests = expert.repair_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(matches!(requests[0][0], Violation::SumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_repairs_fall_back() {
        let broken = quarters([7.0, 7.0, 7.0], 14.0);
        let expert = ScriptedExpert::new(vec![Ok(broken.clone()), Ok(broken.clone()), Ok(broken)]);
        let resolution = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap();

        assert!(resolution.degraded);
        assert_eq!(resolution.iterations_used, DEFAULT_MAX_REPAIR_ITERATIONS);
        assert_eq!(resolution.trail.len(), 3);
        assert_eq!(resolution.phases.last(), Some(&RepairPhase::Fallback));
        let report = BundleValidator::new().validate(&resolution.bundle, &pack().registry);
        assert!(report.is_valid());
        assert_eq!(resolution.bundle.summary.aggregate_confidence, DEFAULT_FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_zero_iterations_falls_back_immediately() {
        let expert = ScriptedExpert::new(vec![Ok(quarters([7.0, 7.0, 7.0], 14.0))]);
        let coordinator = RepairCoordinator::new(RepairConfig {
            max_iterations: 0,
            ..RepairConfig::default()
        });
        let resolution = coordinator.resolve(&expert, &pack()).await.unwrap();
        assert!(resolution.degraded);
        assert_eq!(resolution.iterations_used, 0);
        assert!(expert.repair_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_budget_denial_during_repair_falls_back() {
        let expert = ScriptedExpert::new(vec![
            Ok(quarters([7.0, 7.0, 7.0], 14.0)),
            Err(ExpertError::BudgetExhausted(ReservationDenial::CallsExhausted {
                used: 1,
                max: 1,
            })),
        ]);
        let resolution = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap();
        assert!(resolution.degraded);
        assert_eq!(resolution.iterations_used, 0);
    }

    #[tokio::test]
    async fn test_unavailable_expert_is_an_error() {
        let expert = ScriptedExpert::new(vec![
            Ok(quarters([7.0, 7.0, 7.0], 14.0)),
            Err(ExpertError::Unavailable("connection reset".into())),
        ]);
        let err = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap_err();
        assert!(matches!(err, ExpertError::Unavailable(_)));

        let expert = ScriptedExpert::new(vec![Err(ExpertError::Malformed("not json".into()))]);
        let err = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap_err();
        assert!(matches!(err, ExpertError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_bundles_are_reattributed() {
        let mut draft = quarters([7.0, 7.0, 7.0], 21.0);
        draft.expert_id = "someone-else".into();
        let expert = ScriptedExpert::new(vec![Ok(draft)]);
        let resolution = RepairCoordinator::default().resolve(&expert, &pack()).await.unwrap();
        assert_eq!(resolution.bundle.expert_id, "sharp");
    }
}
