//! Category Registry — the fixed shape every prediction bundle must match.
//!
//! A registry is an ordered list of category descriptors plus the
//! cross-field consistency rules that tie categories together (quarter
//! scores summing to a total, a winner agreeing with a margin).
//!
//! Registries are validated on construction, including when deserialized,
//! so a malformed registry is a contract violation surfaced to the caller
//! rather than something the repair loop could ever fix at runtime.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Default absolute tolerance for `SumEquals` rules.
pub const DEFAULT_SUM_TOLERANCE: f64 = 1e-6;

fn default_tolerance() -> f64 {
    DEFAULT_SUM_TOLERANCE
}

/// Errors raised for malformed registries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("registry declares no categories")]
    Empty,

    #[error("duplicate category id: {0}")]
    DuplicateCategory(String),

    #[error("enumerated category {0} has no allowed values")]
    EmptyValueSet(String),

    #[error("category {category} lists value {value} more than once")]
    DuplicateValue { category: String, value: String },

    #[error("category {0} is not enumerated but lists allowed values")]
    UnexpectedValues(String),

    #[error("category {0} has a non-finite numeric default")]
    InvalidDefault(String),

    #[error("primary category {0} is not declared")]
    UnknownPrimary(String),

    #[error("primary category {0} must be binary or enumerated")]
    NumericPrimary(String),

    #[error("rule references unknown category {0}")]
    UnknownCategory(String),

    #[error("rule expects category {category} to be {expected}")]
    WrongType {
        category: String,
        expected: ValueType,
    },

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}

/// Value type of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Binary,
    Enumerated,
    Numeric,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Enumerated => write!(f, "enumerated"),
            Self::Numeric => write!(f, "numeric"),
        }
    }
}

/// One predictable category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDescriptor {
    pub id: String,
    pub value_type: ValueType,
    /// Allowed values, enumerated categories only. The first entry is the
    /// neutral default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// Neutral value for numeric categories (0.0 when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_numeric: Option<f64>,
}

impl CategoryDescriptor {
    pub fn binary(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value_type: ValueType::Binary,
            allowed_values: Vec::new(),
            default_numeric: None,
        }
    }

    pub fn enumerated<I, S>(id: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            value_type: ValueType::Enumerated,
            allowed_values: values.into_iter().map(Into::into).collect(),
            default_numeric: None,
        }
    }

    pub fn numeric(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value_type: ValueType::Numeric,
            allowed_values: Vec::new(),
            default_numeric: None,
        }
    }

    pub fn with_default(mut self, value: f64) -> Self {
        self.default_numeric = Some(value);
        self
    }

    /// Whether `value` is in the enumerated set.
    pub fn allows(&self, value: &str) -> bool {
        self.allowed_values.iter().any(|v| v == value)
    }
}

/// Cross-field consistency rule declared by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyRule {
    /// The numeric `parts` must sum to the numeric `total`.
    SumEquals {
        parts: Vec<String>,
        total: String,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    /// The enumerated `winner` must be `positive` when `margin > 0` and
    /// `negative` when `margin < 0`. A zero margin constrains nothing.
    WinnerMatchesMargin {
        winner: String,
        margin: String,
        positive: String,
        negative: String,
    },
}

impl ConsistencyRule {
    pub fn sum(parts: &[&str], total: &str) -> Self {
        Self::SumEquals {
            parts: parts.iter().map(|p| p.to_string()).collect(),
            total: total.to_string(),
            tolerance: DEFAULT_SUM_TOLERANCE,
        }
    }

    pub fn winner_margin(winner: &str, margin: &str, positive: &str, negative: &str) -> Self {
        Self::WinnerMatchesMargin {
            winner: winner.to_string(),
            margin: margin.to_string(),
            positive: positive.to_string(),
            negative: negative.to_string(),
        }
    }

    /// Short rule name used in violation messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SumEquals { .. } => "sum_equals",
            Self::WinnerMatchesMargin { .. } => "winner_matches_margin",
        }
    }
}

/// Wire shape of a registry, validated into [`CategoryRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRegistry {
    pub categories: Vec<CategoryDescriptor>,
    #[serde(default)]
    pub rules: Vec<ConsistencyRule>,
    /// Category whose winning value is the council's primary outcome.
    pub primary: String,
}

/// Validated, ordered registry of categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRegistry", into = "RawRegistry")]
pub struct CategoryRegistry {
    categories: Vec<CategoryDescriptor>,
    rules: Vec<ConsistencyRule>,
    primary: String,
    index: HashMap<String, usize>,
}

impl CategoryRegistry {
    /// Build and validate a registry.
    pub fn new(
        categories: Vec<CategoryDescriptor>,
        rules: Vec<ConsistencyRule>,
        primary: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let primary = primary.into();
        if categories.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut index = HashMap::with_capacity(categories.len());
        for (pos, category) in categories.iter().enumerate() {
            if index.insert(category.id.clone(), pos).is_some() {
                return Err(RegistryError::DuplicateCategory(category.id.clone()));
            }
            check_descriptor(category)?;
        }

        let registry = Self {
            categories,
            rules,
            primary,
            index,
        };

        let primary = registry
            .get(&registry.primary)
            .ok_or_else(|| RegistryError::UnknownPrimary(registry.primary.clone()))?;
        if primary.value_type == ValueType::Numeric {
            return Err(RegistryError::NumericPrimary(primary.id.clone()));
        }

        for rule in &registry.rules {
            registry.check_rule(rule)?;
        }

        Ok(registry)
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Always false for a validated registry.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Categories in declaration order.
    pub fn categories(&self) -> &[CategoryDescriptor] {
        &self.categories
    }

    pub fn rules(&self) -> &[ConsistencyRule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&CategoryDescriptor> {
        self.index.get(id).map(|&pos| &self.categories[pos])
    }

    /// Declaration position of a category.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Id of the primary outcome category.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn primary_descriptor(&self) -> &CategoryDescriptor {
        // Presence checked in `new`.
        &self.categories[self.index[&self.primary]]
    }

    /// Categories that appear in any `SumEquals` rule, as part or total.
    pub fn sum_rule_members(&self) -> HashSet<&str> {
        let mut members = HashSet::new();
        for rule in &self.rules {
            if let ConsistencyRule::SumEquals { parts, total, .. } = rule {
                members.extend(parts.iter().map(String::as_str));
                members.insert(total.as_str());
            }
        }
        members
    }

    fn expect_type(&self, id: &str, expected: ValueType) -> Result<&CategoryDescriptor, RegistryError> {
        let descriptor = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownCategory(id.to_string()))?;
        if descriptor.value_type != expected {
            return Err(RegistryError::WrongType {
                category: id.to_string(),
                expected,
            });
        }
        Ok(descriptor)
    }

    fn check_rule(&self, rule: &ConsistencyRule) -> Result<(), RegistryError> {
        match rule {
            ConsistencyRule::SumEquals {
                parts,
                total,
                tolerance,
            } => {
                if parts.is_empty() {
                    return Err(RegistryError::InvalidRule(format!(
                        "sum_equals for {} has no parts",
                        total
                    )));
                }
                if !tolerance.is_finite() || *tolerance < 0.0 {
                    return Err(RegistryError::InvalidRule(format!(
                        "sum_equals for {} has invalid tolerance {}",
                        total, tolerance
                    )));
                }
                self.expect_type(total, ValueType::Numeric)?;
                let mut seen = HashSet::new();
                for part in parts {
                    self.expect_type(part, ValueType::Numeric)?;
                    if part == total {
                        return Err(RegistryError::InvalidRule(format!(
                            "{} is both a part and the total",
                            total
                        )));
                    }
                    if !seen.insert(part.as_str()) {
                        return Err(RegistryError::InvalidRule(format!(
                            "{} listed twice as a part of {}",
                            part, total
                        )));
                    }
                }
            }
            ConsistencyRule::WinnerMatchesMargin {
                winner,
                margin,
                positive,
                negative,
            } => {
                let descriptor = self.expect_type(winner, ValueType::Enumerated)?;
                self.expect_type(margin, ValueType::Numeric)?;
                if positive == negative {
                    return Err(RegistryError::InvalidRule(format!(
                        "{} maps both margin signs to {}",
                        winner, positive
                    )));
                }
                for value in [positive, negative] {
                    if !descriptor.allows(value) {
                        return Err(RegistryError::InvalidRule(format!(
                            "{} does not allow value {}",
                            winner, value
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_descriptor(category: &CategoryDescriptor) -> Result<(), RegistryError> {
    match category.value_type {
        ValueType::Enumerated => {
            if category.allowed_values.is_empty() {
                return Err(RegistryError::EmptyValueSet(category.id.clone()));
            }
            let mut seen = HashSet::new();
            for value in &category.allowed_values {
                if !seen.insert(value.as_str()) {
                    return Err(RegistryError::DuplicateValue {
                        category: category.id.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        ValueType::Binary | ValueType::Numeric => {
            if !category.allowed_values.is_empty() {
                return Err(RegistryError::UnexpectedValues(category.id.clone()));
            }
        }
    }
    if let Some(default) = category.default_numeric {
        if !default.is_finite() {
            return Err(RegistryError::InvalidDefault(category.id.clone()));
        }
    }
    Ok(())
}

impl TryFrom<RawRegistry> for CategoryRegistry {
    type Error = RegistryError;

    fn try_from(raw: RawRegistry) -> Result<Self, Self::Error> {
        Self::new(raw.categories, raw.rules, raw.primary)
    }
}

impl From<CategoryRegistry> for RawRegistry {
    fn from(registry: CategoryRegistry) -> Self {
        Self {
            categories: registry.categories,
            rules: registry.rules,
            primary: registry.primary,
        }
    }
}
