//! Safe fallback bundle: what an expert is recorded as predicting when its
//! repair budget runs out.
//!
//! The fallback is built only from the registry, so it always passes
//! validation: every category once, neutral values, zero stake.

use crate::bundle::{BundleSummary, CategoryPrediction, PredictionBundle, PredictionValue};
use crate::registry::{CategoryDescriptor, CategoryRegistry, ConsistencyRule, ValueType};

/// Default confidence attached to every fallback prediction.
pub const DEFAULT_FALLBACK_CONFIDENCE: f64 = 0.3;

/// Build the neutral bundle for `expert_id` on `event_id`.
///
/// Numeric categories referenced by any consistency rule are zeroed so that
/// sums balance and margins impose no winner constraint.
pub fn safe_bundle(
    registry: &CategoryRegistry,
    expert_id: &str,
    event_id: &str,
    confidence: f64,
) -> PredictionBundle {
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        DEFAULT_FALLBACK_CONFIDENCE
    };
    let ruled = rule_members(registry);

    let predictions = registry
        .categories()
        .iter()
        .map(|descriptor| {
            let value = neutral_value(descriptor, ruled.contains(descriptor.id.as_str()));
            CategoryPrediction::new(descriptor.id.clone(), value, confidence).with_stake(0.0)
        })
        .collect();

    let primary = registry.primary_descriptor();
    let primary_outcome = neutral_value(primary, ruled.contains(primary.id.as_str()))
        .label()
        .unwrap_or_default();
    let outcome_probability = match primary.value_type {
        ValueType::Binary => 0.5,
        ValueType::Enumerated if !primary.allowed_values.is_empty() => {
            1.0 / primary.allowed_values.len() as f64
        }
        _ => 0.5,
    };

    PredictionBundle {
        expert_id: expert_id.to_string(),
        event_id: event_id.to_string(),
        predictions,
        summary: BundleSummary {
            primary_outcome,
            outcome_probability,
            aggregate_confidence: confidence,
        },
    }
}

fn neutral_value(descriptor: &CategoryDescriptor, ruled: bool) -> PredictionValue {
    match descriptor.value_type {
        ValueType::Binary => PredictionValue::Binary(false),
        ValueType::Enumerated => PredictionValue::Enumerated(
            descriptor.allowed_values.first().cloned().unwrap_or_default(),
        ),
        ValueType::Numeric if ruled => PredictionValue::Numeric(0.0),
        ValueType::Numeric => PredictionValue::Numeric(
            descriptor
                .default_numeric
                .filter(|v| v.is_finite())
                .unwrap_or(0.0),
        ),
    }
}

/// Numeric categories a rule reads: sum parts, sum totals and margins.
fn rule_members(registry: &CategoryRegistry) -> std::collections::HashSet<&str> {
    let mut members = registry.sum_rule_members();
    for rule in registry.rules() {
        if let ConsistencyRule::WinnerMatchesMargin { margin, .. } = rule {
            members.insert(margin.as_str());
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::BundleValidator;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::new(
            vec![
                CategoryDescriptor::enumerated("winner", ["home", "away", "draw"]),
                CategoryDescriptor::numeric("margin").with_default(3.5),
                CategoryDescriptor::numeric("q1").with_default(7.0),
                CategoryDescriptor::numeric("q2"),
                CategoryDescriptor::numeric("total").with_default(44.0),
                CategoryDescriptor::numeric("attendance").with_default(61_500.0),
                CategoryDescriptor::binary("overtime"),
            ],
            vec![
                ConsistencyRule::sum(&["q1", "q2"], "total"),
                ConsistencyRule::winner_margin("winner", "margin", "home", "away"),
            ],
            "winner",
        )
        .unwrap()
    }

    #[test]
    fn test_fallback_always_validates() {
        let registry = registry();
        let bundle = safe_bundle(&registry, "sharp", "evt-1", DEFAULT_FALLBACK_CONFIDENCE);
        let report = BundleValidator::new().validate(&bundle, &registry);
        assert!(report.is_valid(), "{}", report.summary());
    }

    #[test]
    fn test_fallback_values_are_neutral() {
        let bundle = safe_bundle(&registry(), "sharp", "evt-1", 0.3);
        assert_eq!(bundle.expert_id, "sharp");
        assert_eq!(bundle.event_id, "evt-1");
        assert_eq!(
            bundle.prediction("winner").unwrap().value,
            PredictionValue::Enumerated("home".into())
        );
        assert_eq!(bundle.prediction("margin").unwrap().value.as_numeric(), Some(0.0));
        assert_eq!(bundle.prediction("q1").unwrap().value.as_numeric(), Some(0.0));
        assert_eq!(
            bundle.prediction("attendance").unwrap().value.as_numeric(),
            Some(61_500.0)
        );
        assert_eq!(
            bundle.prediction("overtime").unwrap().value,
            PredictionValue::Binary(false)
        );
        assert!(bundle
            .predictions
            .iter()
            .all(|p| p.stake_weight == 0.0 && p.confidence == 0.3 && p.rationale_refs.is_empty()));
        assert_eq!(bundle.summary.primary_outcome, "home");
        assert!((bundle.summary.outcome_probability - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(bundle.summary.aggregate_confidence, 0.3);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let bundle = safe_bundle(&registry(), "sharp", "evt-1", 1.7);
        assert_eq!(bundle.summary.aggregate_confidence, 1.0);
        let bundle = safe_bundle(&registry(), "sharp", "evt-1", f64::NAN);
        assert_eq!(bundle.summary.aggregate_confidence, DEFAULT_FALLBACK_CONFIDENCE);
    }
}
