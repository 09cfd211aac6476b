//! Expert standings from the performance tracker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Accuracy history for one expert.
///
/// The tracker supplies only the two accuracies. The per-run council weight
/// is derived from them by the aggregator and reported on
/// [`ExpertWeight`](super::voting::ExpertWeight).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpertStanding {
    /// Long-run accuracy in [0, 1].
    pub overall_accuracy: f64,
    /// Accuracy over the recent window in [0, 1].
    pub recent_accuracy: f64,
}

impl ExpertStanding {
    /// Standing assumed for an expert the tracker knows nothing about.
    pub const NEUTRAL: ExpertStanding = ExpertStanding {
        overall_accuracy: 0.5,
        recent_accuracy: 0.5,
    };

    pub fn new(overall_accuracy: f64, recent_accuracy: f64) -> Self {
        Self {
            overall_accuracy,
            recent_accuracy,
        }
    }
}

impl Default for ExpertStanding {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Source of expert standings. Read-only; polled once per run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PerformanceTracker: Send + Sync {
    /// Standing for `expert_id`, or `None` if the expert has no history.
    async fn get_standing(&self, expert_id: &str) -> Option<ExpertStanding>;
}

pub type SharedPerformanceTracker = Arc<dyn PerformanceTracker>;

/// Tracker backed by a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticStandings {
    standings: HashMap<String, ExpertStanding>,
}

impl StaticStandings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standing(mut self, expert_id: impl Into<String>, standing: ExpertStanding) -> Self {
        self.standings.insert(expert_id.into(), standing);
        self
    }

    pub fn shared(self) -> SharedPerformanceTracker {
        Arc::new(self)
    }
}

impl FromIterator<(String, ExpertStanding)> for StaticStandings {
    fn from_iter<T: IntoIterator<Item = (String, ExpertStanding)>>(iter: T) -> Self {
        Self {
            standings: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PerformanceTracker for StaticStandings {
    async fn get_standing(&self, expert_id: &str) -> Option<ExpertStanding> {
        self.standings.get(expert_id).copied()
    }
}
