//! Per-expert outcomes and the caller-facing orchestration result.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::verifier::ValidationReport;

use super::voting::Consensus;

/// Why an expert contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    BudgetExhausted,
    Timeout,
    Unavailable,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Terminal status of one expert pipeline.
///
/// Rendered as `success`, `degraded`, or `failed:<reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpertStatus {
    Success,
    Degraded,
    Failed(FailureReason),
}

impl ExpertStatus {
    /// Whether the expert's bundle goes to consensus.
    pub fn contributes(self) -> bool {
        matches!(self, Self::Success | Self::Degraded)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for ExpertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed(reason) => write!(f, "failed:{}", reason),
        }
    }
}

impl FromStr for ExpertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "degraded" => Ok(Self::Degraded),
            "failed:budget_exhausted" => Ok(Self::Failed(FailureReason::BudgetExhausted)),
            "failed:timeout" => Ok(Self::Failed(FailureReason::Timeout)),
            "failed:unavailable" => Ok(Self::Failed(FailureReason::Unavailable)),
            other => Err(format!("unknown expert status: {}", other)),
        }
    }
}

impl Serialize for ExpertStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExpertStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What happened to one expert during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertOutcome {
    pub expert_id: String,
    pub status: ExpertStatus,
    /// Wall-clock time of the whole pipeline, context assembly included.
    pub duration_ms: u64,
    pub iterations_used: u32,
    /// External calls charged to the expert's budget.
    pub calls_used: u32,
    /// Validation reports from the repair loop, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repair_trail: Vec<ValidationReport>,
}

impl ExpertOutcome {
    pub fn failed(expert_id: impl Into<String>, reason: FailureReason, duration_ms: u64) -> Self {
        Self {
            expert_id: expert_id.into(),
            status: ExpertStatus::Failed(reason),
            duration_ms,
            iterations_used: 0,
            calls_used: 0,
            repair_trail: Vec::new(),
        }
    }
}

/// Result of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: String,
    pub event_id: String,
    /// One entry per requested expert, in request order.
    pub per_expert: Vec<ExpertOutcome>,
    pub council: Consensus,
    /// Set when no expert contributed.
    pub degraded_service: bool,
}

impl OrchestrationResult {
    pub fn outcome(&self, expert_id: &str) -> Option<&ExpertOutcome> {
        self.per_expert.iter().find(|o| o.expert_id == expert_id)
    }

    pub fn count(&self, status: ExpertStatus) -> usize {
        self.per_expert.iter().filter(|o| o.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let statuses = [
            (ExpertStatus::Success, "success"),
            (ExpertStatus::Degraded, "degraded"),
            (ExpertStatus::Failed(FailureReason::Timeout), "failed:timeout"),
            (
                ExpertStatus::Failed(FailureReason::BudgetExhausted),
                "failed:budget_exhausted",
            ),
            (ExpertStatus::Failed(FailureReason::Unavailable), "failed:unavailable"),
        ];
        for (status, text) in statuses {
            assert_eq!(status.to_string(), text);
            assert_eq!(serde_json::to_value(status).unwrap(), text);
            assert_eq!(
                serde_json::from_value::<ExpertStatus>(serde_json::json!(text)).unwrap(),
                status
            );
        }
        assert!(serde_json::from_value::<ExpertStatus>(serde_json::json!("failed:bored")).is_err());
    }

    #[test]
    fn test_only_success_and_degraded_contribute() {
        assert!(ExpertStatus::Success.contributes());
        assert!(ExpertStatus::Degraded.contributes());
        assert!(!ExpertStatus::Failed(FailureReason::Timeout).contributes());
        assert!(ExpertStatus::Failed(FailureReason::Unavailable).is_failed());
    }
}
