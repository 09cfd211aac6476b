//! Bundle Validator — structural and cross-field checks against a registry.
//!
//! Checks run in a fixed order and every violation is collected, so a
//! single repair request can address all of them at once:
//!
//! 1. length matches and every category appears exactly once
//! 2. confidences (and summary probabilities) in [0, 1]
//! 3. stake weights in [0, 5]
//! 4. values conform to the category type
//! 5. registry consistency rules
//!
//! Validation is pure: the same bundle always yields the same report.

use std::collections::HashMap;

use tracing::debug;

use crate::bundle::{CategoryPrediction, PredictionBundle, PredictionValue};
use crate::registry::{CategoryDescriptor, CategoryRegistry, ConsistencyRule, ValueType};

use super::report::{ValidationReport, Violation};

/// Upper bound on a prediction's stake.
pub const MAX_STAKE_WEIGHT: f64 = 5.0;

/// Stateless validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleValidator;

impl BundleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `bundle` against `registry`.
    pub fn validate(&self, bundle: &PredictionBundle, registry: &CategoryRegistry) -> ValidationReport {
        let mut violations = Vec::new();

        // First occurrence of each category, by id.
        let mut by_id: HashMap<&str, &CategoryPrediction> = HashMap::new();

        // 1. Structure
        if bundle.len() != registry.len() {
            violations.push(Violation::LengthMismatch {
                expected: registry.len(),
                actual: bundle.len(),
            });
        }
        for prediction in &bundle.predictions {
            let id = prediction.category_id.as_str();
            if !registry.contains(id) {
                violations.push(Violation::UnknownCategory {
                    category_id: id.to_string(),
                });
                continue;
            }
            if by_id.insert(id, prediction).is_some() {
                violations.push(Violation::DuplicateCategory {
                    category_id: id.to_string(),
                });
            }
        }
        for descriptor in registry.categories() {
            if !by_id.contains_key(descriptor.id.as_str()) {
                violations.push(Violation::MissingCategory {
                    category_id: descriptor.id.clone(),
                });
            }
        }

        // 2. Confidence
        for prediction in &bundle.predictions {
            if !in_unit_range(prediction.confidence) {
                violations.push(Violation::ConfidenceOutOfRange {
                    category_id: prediction.category_id.clone(),
                    confidence: prediction.confidence,
                });
            }
        }
        for (field, value) in [
            ("outcome_probability", bundle.summary.outcome_probability),
            ("aggregate_confidence", bundle.summary.aggregate_confidence),
        ] {
            if !in_unit_range(value) {
                violations.push(Violation::SummaryOutOfRange {
                    field: field.to_string(),
                    value,
                });
            }
        }

        // 3. Stake
        for prediction in &bundle.predictions {
            if !(0.0..=MAX_STAKE_WEIGHT).contains(&prediction.stake_weight) {
                violations.push(Violation::StakeOutOfRange {
                    category_id: prediction.category_id.clone(),
                    stake_weight: prediction.stake_weight,
                });
            }
        }

        // 4. Type conformance
        for prediction in &bundle.predictions {
            if let Some(descriptor) = registry.get(&prediction.category_id) {
                if let Some(violation) = check_type(descriptor, &prediction.value) {
                    violations.push(violation);
                }
            }
        }

        // 5. Cross-field rules
        for rule in registry.rules() {
            if let Some(violation) = check_rule(rule, &by_id) {
                violations.push(violation);
            }
        }

        let report = ValidationReport::from_violations(violations);
        debug!(
            expert_id = %bundle.expert_id,
            valid = report.valid,
            violations = report.violations.len(),
            "bundle validated"
        );
        report
    }
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn check_type(descriptor: &CategoryDescriptor, value: &PredictionValue) -> Option<Violation> {
    let category_id = descriptor.id.clone();
    match (descriptor.value_type, value) {
        (ValueType::Binary, PredictionValue::Binary(_)) => None,
        (ValueType::Enumerated, PredictionValue::Enumerated(v)) => {
            if descriptor.allows(v) {
                None
            } else {
                Some(Violation::ValueNotAllowed {
                    category_id,
                    value: v.clone(),
                    allowed: descriptor.allowed_values.clone(),
                })
            }
        }
        (ValueType::Numeric, PredictionValue::Numeric(v)) => {
            if v.is_finite() {
                None
            } else {
                Some(Violation::NonFiniteValue { category_id })
            }
        }
        (expected, _) => Some(Violation::TypeMismatch {
            category_id,
            expected,
        }),
    }
}

/// Finite numeric value of a category, if well-formed.
fn numeric_of(by_id: &HashMap<&str, &CategoryPrediction>, id: &str) -> Option<f64> {
    by_id
        .get(id)
        .and_then(|p| p.value.as_numeric())
        .filter(|v| v.is_finite())
}

/// Evaluate a rule. Rules over missing or ill-typed categories are skipped;
/// those defects are already reported by earlier checks.
fn check_rule(
    rule: &ConsistencyRule,
    by_id: &HashMap<&str, &CategoryPrediction>,
) -> Option<Violation> {
    match rule {
        ConsistencyRule::SumEquals {
            parts,
            total,
            tolerance,
        } => {
            let declared_total = numeric_of(by_id, total)?;
            let mut parts_sum = 0.0;
            for part in parts {
                parts_sum += numeric_of(by_id, part)?;
            }
            if (parts_sum - declared_total).abs() > *tolerance {
                return Some(Violation::SumMismatch {
                    total: total.clone(),
                    parts: parts.clone(),
                    parts_sum,
                    declared_total,
                });
            }
            None
        }
        ConsistencyRule::WinnerMatchesMargin {
            winner,
            margin,
            positive,
            negative,
        } => {
            let margin_value = numeric_of(by_id, margin)?;
            let found = by_id.get(winner.as_str())?.value.as_enumerated()?;
            let expected = if margin_value > 0.0 {
                positive
            } else if margin_value < 0.0 {
                negative
            } else {
                return None;
            };
            if found != expected {
                return Some(Violation::WinnerMarginMismatch {
                    winner: winner.clone(),
                    margin: margin.clone(),
                    margin_value,
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleSummary;
    use crate::verifier::report::CheckStage;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::new(
            vec![
                CategoryDescriptor::enumerated("winner", ["home", "away"]),
                CategoryDescriptor::numeric("margin"),
                CategoryDescriptor::numeric("q1"),
                CategoryDescriptor::numeric("q2"),
                CategoryDescriptor::numeric("q3"),
                CategoryDescriptor::numeric("total"),
                CategoryDescriptor::binary("overtime"),
            ],
            vec![
                ConsistencyRule::sum(&["q1", "q2", "q3"], "total"),
                ConsistencyRule::winner_margin("winner", "margin", "home", "away"),
            ],
            "winner",
        )
        .unwrap()
    }

    fn num(id: &str, v: f64) -> CategoryPrediction {
        CategoryPrediction::new(id, PredictionValue::Numeric(v), 0.6)
    }

    fn bundle(quarters: [f64; 3], total: f64) -> PredictionBundle {
        PredictionBundle {
            expert_id: "sharp".into(),
            event_id: "evt-1".into(),
            predictions: vec![
                CategoryPrediction::new("winner", PredictionValue::Enumerated("home".into()), 0.7),
                num("margin", 3.0),
                num("q1", quarters[0]),
                num("q2", quarters[1]),
                num("q3", quarters[2]),
                num("total", total),
                CategoryPrediction::new("overtime", PredictionValue::Binary(false), 0.9),
            ],
            summary: BundleSummary {
                primary_outcome: "home".into(),
                outcome_probability: 0.62,
                aggregate_confidence: 0.7,
            },
        }
    }

    #[test]
    fn test_valid_bundle_passes() {
        let report = BundleValidator::new().validate(&bundle([7.0, 7.0, 7.0], 21.0), &registry());
        assert!(report.is_valid(), "{}", report.summary());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let validator = BundleValidator::new();
        let b = bundle([10.0, 3.0, 7.0], 20.0);
        let first = validator.validate(&b, &registry());
        let second = validator.validate(&b, &registry());
        assert!(first.is_valid());
        assert_eq!(first, second);
    }

    #[test]
    fn test_quarter_sum_mismatch_is_single_violation() {
        let report = BundleValidator::new().validate(&bundle([7.0, 7.0, 7.0], 14.0), &registry());
        assert_eq!(report.violations.len(), 1);
        assert!(matches!(
            &report.violations[0],
            Violation::SumMismatch { parts_sum, declared_total, .. }
                if *parts_sum == 21.0 && *declared_total == 14.0
        ));
    }

    #[test]
    fn test_structure_violations() {
        let mut b = bundle([7.0, 7.0, 7.0], 21.0);
        b.predictions.retain(|p| p.category_id != "overtime");
        b.predictions.push(num("q1", 7.0));
        b.predictions.push(num("q9", 1.0));
        let report = BundleValidator::new().validate(&b, &registry());
        let structural: Vec<_> = report.at_stage(CheckStage::Structure).collect();
        assert!(structural.contains(&&Violation::LengthMismatch {
            expected: 7,
            actual: 8
        }));
        assert!(structural.contains(&&Violation::DuplicateCategory {
            category_id: "q1".into()
        }));
        assert!(structural.contains(&&Violation::UnknownCategory {
            category_id: "q9".into()
        }));
        assert!(structural.contains(&&Violation::MissingCategory {
            category_id: "overtime".into()
        }));
    }

    #[test]
    fn test_collects_every_violation() {
        let mut b = bundle([7.0, 7.0, 7.0], 21.0);
        b.predictions[0].confidence = 1.4;
        b.predictions[1].stake_weight = 6.0;
        b.predictions[6].value = PredictionValue::Numeric(1.0);
        b.predictions[2].value = PredictionValue::Numeric(f64::NAN);
        b.summary.outcome_probability = -0.1;
        let report = BundleValidator::new().validate(&b, &registry());

        let stages: Vec<CheckStage> = report.violations.iter().map(|v| v.stage()).collect();
        assert_eq!(
            stages,
            vec![
                CheckStage::Confidence,
                CheckStage::Confidence,
                CheckStage::Stake,
                CheckStage::TypeConformance,
                CheckStage::TypeConformance,
            ]
        );
        // The sum rule is skipped because q1 is not finite.
        assert_eq!(report.at_stage(CheckStage::CrossField).count(), 0);
    }

    #[test]
    fn test_enumerated_value_outside_set() {
        let mut b = bundle([7.0, 7.0, 7.0], 21.0);
        b.predictions[0].value = PredictionValue::Enumerated("tie".into());
        let report = BundleValidator::new().validate(&b, &registry());
        assert!(matches!(
            &report.violations[0],
            Violation::ValueNotAllowed { value, .. } if value == "tie"
        ));
    }

    #[test]
    fn test_winner_must_agree_with_margin_sign() {
        let mut b = bundle([7.0, 7.0, 7.0], 21.0);
        b.predictions[1].value = PredictionValue::Numeric(-4.5);
        let report = BundleValidator::new().validate(&b, &registry());
        assert_eq!(report.violations.len(), 1);
        assert!(matches!(
            &report.violations[0],
            Violation::WinnerMarginMismatch { expected, found, .. }
                if expected == "away" && found == "home"
        ));

        b.predictions[1].value = PredictionValue::Numeric(0.0);
        assert!(BundleValidator::new().validate(&b, &registry()).is_valid());
    }
}
