//! Consensus voting — weighted combination of validated bundles.
//!
//! Each contributing expert gets a raw weight from a fixed linear
//! combination of its standing and its own aggregate confidence. Weights are
//! normalized over contributors only. Discrete categories go to the value
//! with the most weight; numeric categories take the weighted mean.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bundle::{BundleSummary, PredictionBundle, PredictionValue};
use crate::registry::{CategoryDescriptor, CategoryRegistry, ValueType};

use super::standing::ExpertStanding;

/// Totals closer than this are treated as tied.
const TIE_EPSILON: f64 = 1e-12;

/// Coefficients of the raw expert weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusWeights {
    pub overall: f64,
    pub recent: f64,
    pub confidence: f64,
}

impl Default for ConsensusWeights {
    fn default() -> Self {
        Self {
            overall: 0.4,
            recent: 0.4,
            confidence: 0.2,
        }
    }
}

impl ConsensusWeights {
    /// Raw, unnormalized weight.
    pub fn raw(&self, standing: &ExpertStanding, aggregate_confidence: f64) -> f64 {
        let raw = self.overall * unit(standing.overall_accuracy)
            + self.recent * unit(standing.recent_accuracy)
            + self.confidence * unit(aggregate_confidence);
        raw.max(0.0)
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Council verdict for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilPrediction {
    pub category_id: String,
    pub value: PredictionValue,
    /// Weight behind the winning value; 1.0 for numeric means.
    pub support: f64,
    /// Weighted mean of contributor confidences.
    pub confidence: f64,
}

/// One contributor's share of the vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertWeight {
    pub expert_id: String,
    pub standing: ExpertStanding,
    /// Normalized weight; all contributors sum to 1.
    pub council_weight: f64,
}

/// Aggregated council prediction for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilBundle {
    pub event_id: String,
    /// One entry per registry category, in registry order.
    pub predictions: Vec<CouncilPrediction>,
    pub summary: BundleSummary,
    pub contributors: usize,
    pub weights: Vec<ExpertWeight>,
}

impl CouncilBundle {
    pub fn prediction(&self, category_id: &str) -> Option<&CouncilPrediction> {
        self.predictions.iter().find(|p| p.category_id == category_id)
    }

    pub fn weight_of(&self, expert_id: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|w| w.expert_id == expert_id)
            .map(|w| w.council_weight)
    }
}

/// Result of aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "bundle", rename_all = "snake_case")]
pub enum Consensus {
    Reached(CouncilBundle),
    /// No expert contributed a bundle.
    NoConsensus,
}

impl Consensus {
    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached(_))
    }

    pub fn bundle(&self) -> Option<&CouncilBundle> {
        match self {
            Self::Reached(bundle) => Some(bundle),
            Self::NoConsensus => None,
        }
    }
}

/// Weighted-vote aggregator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusAggregator {
    weights: ConsensusWeights,
}

impl ConsensusAggregator {
    pub fn new(weights: ConsensusWeights) -> Self {
        Self { weights }
    }

    /// Combine validated bundles into a council bundle.
    ///
    /// Experts missing from `standings` are weighed with
    /// [`ExpertStanding::NEUTRAL`]. The result does not depend on the order
    /// of `bundles`.
    pub fn aggregate(
        &self,
        bundles: &[PredictionBundle],
        standings: &HashMap<String, ExpertStanding>,
        registry: &CategoryRegistry,
    ) -> Consensus {
        if bundles.is_empty() {
            warn!("no contributing bundles, no consensus");
            return Consensus::NoConsensus;
        }

        let mut ordered: Vec<&PredictionBundle> = bundles.iter().collect();
        ordered.sort_by(|a, b| a.expert_id.cmp(&b.expert_id));

        let weights = self.normalized_weights(&ordered, standings);

        let predictions: Vec<CouncilPrediction> = registry
            .categories()
            .iter()
            .filter_map(|descriptor| combine_category(descriptor, &ordered, &weights))
            .collect();

        let primary = registry.primary();
        let (primary_outcome, outcome_probability) = predictions
            .iter()
            .find(|p| p.category_id == primary)
            .map(|p| (p.value.to_string(), p.support.clamp(0.0, 1.0)))
            .unwrap_or_default();
        let aggregate_confidence = ordered
            .iter()
            .zip(&weights)
            .map(|(b, w)| w.council_weight * unit(b.summary.aggregate_confidence))
            .sum::<f64>()
            .clamp(0.0, 1.0);

        let event_id = ordered[0].event_id.clone();
        info!(
            event_id = %event_id,
            contributors = ordered.len(),
            primary_outcome = %primary_outcome,
            outcome_probability,
            "consensus reached"
        );

        Consensus::Reached(CouncilBundle {
            event_id,
            predictions,
            summary: BundleSummary {
                primary_outcome,
                outcome_probability,
                aggregate_confidence,
            },
            contributors: ordered.len(),
            weights,
        })
    }

    fn normalized_weights(
        &self,
        bundles: &[&PredictionBundle],
        standings: &HashMap<String, ExpertStanding>,
    ) -> Vec<ExpertWeight> {
        let raw: Vec<(String, ExpertStanding, f64)> = bundles
            .iter()
            .map(|bundle| {
                let standing = standings
                    .get(&bundle.expert_id)
                    .copied()
                    .unwrap_or(ExpertStanding::NEUTRAL);
                let weight = self
                    .weights
                    .raw(&standing, bundle.summary.aggregate_confidence);
                (bundle.expert_id.clone(), standing, weight)
            })
            .collect();

        let total: f64 = raw.iter().map(|(_, _, w)| w).sum();
        let n = raw.len() as f64;
        let equal = !(total.is_finite() && total > 0.0);
        if equal {
            debug!(contributors = raw.len(), "all raw weights zero, splitting evenly");
        }

        raw.into_iter()
            .map(|(expert_id, standing, weight)| ExpertWeight {
                expert_id,
                standing,
                council_weight: if equal { 1.0 / n } else { weight / total },
            })
            .collect()
    }
}

fn combine_category(
    descriptor: &CategoryDescriptor,
    bundles: &[&PredictionBundle],
    weights: &[ExpertWeight],
) -> Option<CouncilPrediction> {
    let votes: Vec<(&PredictionValue, f64, f64, &str)> = bundles
        .iter()
        .zip(weights)
        .filter_map(|(bundle, w)| {
            bundle.prediction(&descriptor.id).map(|p| {
                (&p.value, p.confidence, w.council_weight, bundle.expert_id.as_str())
            })
        })
        .collect();
    if votes.is_empty() {
        return None;
    }

    let vote_weight: f64 = votes.iter().map(|(_, _, w, _)| w).sum();
    let confidence = if vote_weight > 0.0 {
        votes.iter().map(|(_, c, w, _)| c * w).sum::<f64>() / vote_weight
    } else {
        0.0
    };

    let (value, support) = match descriptor.value_type {
        ValueType::Numeric => (numeric_mean(&votes, vote_weight), 1.0),
        ValueType::Binary | ValueType::Enumerated => plurality(&votes),
    };

    Some(CouncilPrediction {
        category_id: descriptor.id.clone(),
        value,
        support,
        confidence,
    })
}

fn numeric_mean(votes: &[(&PredictionValue, f64, f64, &str)], vote_weight: f64) -> PredictionValue {
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (value, _, w, _) in votes {
        if let Some(v) = value.as_numeric() {
            sum += v * w;
            weight += w;
        }
    }
    let mean = if weight > 0.0 {
        sum / weight
    } else if vote_weight > 0.0 {
        0.0
    } else {
        votes
            .iter()
            .filter_map(|(v, ..)| v.as_numeric())
            .sum::<f64>()
            / votes.len() as f64
    };
    PredictionValue::Numeric(mean)
}

/// Value with the most weight. Ties go to the value backed by the single
/// heaviest expert, then to the smallest expert id.
fn plurality(votes: &[(&PredictionValue, f64, f64, &str)]) -> (PredictionValue, f64) {
    let mut totals: HashMap<String, (PredictionValue, f64)> = HashMap::new();
    for (value, _, w, _) in votes {
        let label = value.to_string();
        let entry = totals.entry(label).or_insert_with(|| ((*value).clone(), 0.0));
        entry.1 += w;
    }

    let best = totals
        .values()
        .map(|(_, total)| *total)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut backers: Vec<&(&PredictionValue, f64, f64, &str)> = votes.iter().collect();
    backers.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.3.cmp(b.3)));

    for (value, ..) in backers {
        let label = value.to_string();
        if let Some((winner, total)) = totals.get(&label) {
            if best - total <= TIE_EPSILON {
                return (winner.clone(), *total);
            }
        }
    }

    // Unreachable with at least one vote.
    (votes[0].0.clone(), 0.0)
}
