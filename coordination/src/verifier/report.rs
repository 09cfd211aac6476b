//! Validation Report — structured violations for the repair loop.
//!
//! Violations are serializable so they can be handed back to an expert
//! verbatim as repair instructions.

use serde::{Deserialize, Serialize};

use crate::registry::ValueType;

/// Which validation check produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Structure,
    Confidence,
    Stake,
    TypeConformance,
    CrossField,
}

impl std::fmt::Display for CheckStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structure => write!(f, "structure"),
            Self::Confidence => write!(f, "confidence"),
            Self::Stake => write!(f, "stake"),
            Self::TypeConformance => write!(f, "type_conformance"),
            Self::CrossField => write!(f, "cross_field"),
        }
    }
}

/// A single invariant violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    LengthMismatch {
        expected: usize,
        actual: usize,
    },
    MissingCategory {
        category_id: String,
    },
    DuplicateCategory {
        category_id: String,
    },
    UnknownCategory {
        category_id: String,
    },
    ConfidenceOutOfRange {
        category_id: String,
        confidence: f64,
    },
    /// A summary field outside [0, 1].
    SummaryOutOfRange {
        field: String,
        value: f64,
    },
    StakeOutOfRange {
        category_id: String,
        stake_weight: f64,
    },
    TypeMismatch {
        category_id: String,
        expected: ValueType,
    },
    ValueNotAllowed {
        category_id: String,
        value: String,
        allowed: Vec<String>,
    },
    NonFiniteValue {
        category_id: String,
    },
    SumMismatch {
        total: String,
        parts: Vec<String>,
        parts_sum: f64,
        declared_total: f64,
    },
    WinnerMarginMismatch {
        winner: String,
        margin: String,
        margin_value: f64,
        expected: String,
        found: String,
    },
}

impl Violation {
    pub fn stage(&self) -> CheckStage {
        match self {
            Self::LengthMismatch { .. }
            | Self::MissingCategory { .. }
            | Self::DuplicateCategory { .. }
            | Self::UnknownCategory { .. } => CheckStage::Structure,
            Self::ConfidenceOutOfRange { .. } | Self::SummaryOutOfRange { .. } => {
                CheckStage::Confidence
            }
            Self::StakeOutOfRange { .. } => CheckStage::Stake,
            Self::TypeMismatch { .. } | Self::ValueNotAllowed { .. } | Self::NonFiniteValue { .. } => {
                CheckStage::TypeConformance
            }
            Self::SumMismatch { .. } | Self::WinnerMarginMismatch { .. } => CheckStage::CrossField,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => {
                write!(f, "bundle has {} predictions, registry has {}", actual, expected)
            }
            Self::MissingCategory { category_id } => write!(f, "missing category {}", category_id),
            Self::DuplicateCategory { category_id } => {
                write!(f, "category {} predicted more than once", category_id)
            }
            Self::UnknownCategory { category_id } => {
                write!(f, "category {} is not in the registry", category_id)
            }
            Self::ConfidenceOutOfRange {
                category_id,
                confidence,
            } => write!(
                f,
                "{}: confidence {} outside [0, 1]",
                category_id, confidence
            ),
            Self::SummaryOutOfRange { field, value } => {
                write!(f, "summary.{} = {} outside [0, 1]", field, value)
            }
            Self::StakeOutOfRange {
                category_id,
                stake_weight,
            } => write!(
                f,
                "{}: stake_weight {} outside [0, 5]",
                category_id, stake_weight
            ),
            Self::TypeMismatch {
                category_id,
                expected,
            } => write!(f, "{}: expected a {} value", category_id, expected),
            Self::ValueNotAllowed {
                category_id,
                value,
                allowed,
            } => write!(
                f,
                "{}: {} not in [{}]",
                category_id,
                value,
                allowed.join(", ")
            ),
            Self::NonFiniteValue { category_id } => {
                write!(f, "{}: numeric value is not finite", category_id)
            }
            Self::SumMismatch {
                total,
                parts,
                parts_sum,
                declared_total,
            } => write!(
                f,
                "{} = {} but {} sum to {}",
                total,
                declared_total,
                parts.join(" + "),
                parts_sum
            ),
            Self::WinnerMarginMismatch {
                winner,
                margin,
                margin_value,
                expected,
                found,
            } => write!(
                f,
                "{} is {} but {} = {} implies {}",
                winner, found, margin, margin_value, expected
            ),
        }
    }
}

/// Result of validating one bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Every violation found, in check order.
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Violations produced by one check stage.
    pub fn at_stage(&self, stage: CheckStage) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.stage() == stage)
    }

    /// One line per violation, for logs and repair prompts.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
