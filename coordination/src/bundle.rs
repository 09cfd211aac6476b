//! Prediction bundles — one expert's full set of predictions for an event.

use serde::{Deserialize, Serialize};

/// A typed category value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionValue {
    Binary(bool),
    Enumerated(String),
    Numeric(f64),
}

impl PredictionValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enumerated(&self) -> Option<&str> {
        match self {
            Self::Enumerated(v) => Some(v),
            _ => None,
        }
    }

    /// Label used when a discrete value is voted on or reported as an outcome.
    ///
    /// Numeric values have no stable label; callers vote on them by mean.
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Binary(v) => Some(v.to_string()),
            Self::Enumerated(v) => Some(v.clone()),
            Self::Numeric(_) => None,
        }
    }
}

impl std::fmt::Display for PredictionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary(v) => write!(f, "{}", v),
            Self::Enumerated(v) => write!(f, "{}", v),
            Self::Numeric(v) => write!(f, "{}", v),
        }
    }
}

/// A reference from a prediction back to the memory that informed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationaleRef {
    pub record_id: String,
    pub weight: f64,
}

/// One category prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub category_id: String,
    pub value: PredictionValue,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Stake in [0, 5].
    pub stake_weight: f64,
    #[serde(default)]
    pub rationale_refs: Vec<RationaleRef>,
}

impl CategoryPrediction {
    pub fn new(category_id: impl Into<String>, value: PredictionValue, confidence: f64) -> Self {
        Self {
            category_id: category_id.into(),
            value,
            confidence,
            stake_weight: 1.0,
            rationale_refs: Vec::new(),
        }
    }

    pub fn with_stake(mut self, stake_weight: f64) -> Self {
        self.stake_weight = stake_weight;
        self
    }

    pub fn with_rationale(mut self, record_id: impl Into<String>, weight: f64) -> Self {
        self.rationale_refs.push(RationaleRef {
            record_id: record_id.into(),
            weight,
        });
        self
    }
}

/// Bundle-level summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    /// Predicted value of the registry's primary category.
    pub primary_outcome: String,
    /// Probability in [0, 1].
    pub outcome_probability: f64,
    /// Confidence in [0, 1].
    pub aggregate_confidence: f64,
}

/// An expert's complete prediction set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBundle {
    pub expert_id: String,
    pub event_id: String,
    pub predictions: Vec<CategoryPrediction>,
    pub summary: BundleSummary,
}

impl PredictionBundle {
    /// Prediction for a category, if present.
    pub fn prediction(&self, category_id: &str) -> Option<&CategoryPrediction> {
        self.predictions.iter().find(|p| p.category_id == category_id)
    }

    pub fn prediction_mut(&mut self, category_id: &str) -> Option<&mut CategoryPrediction> {
        self.predictions
            .iter_mut()
            .find(|p| p.category_id == category_id)
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}
