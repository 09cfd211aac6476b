//! Council configuration (TOML file plus environment overrides).
//!
//! ```toml
//! [context]
//! decay_tau_days = 90.0
//!
//! [defaults]
//! alpha = 0.7
//! top_k = 10
//!
//! [classes.quant]
//! alpha = 0.9
//! max_calls = 3
//!
//! [[experts]]
//! id = "sharp"
//! class = "quant"
//! endpoint = "http://localhost:8090"
//! top_k = 20
//! ```
//!
//! A single expert resolves expert override → class override → defaults
//! into an [`ExpertProfile`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::context_packer::{AssemblyParams, DEFAULT_CANDIDATE_POOL, DEFAULT_TOP_K};
use crate::ensemble::voting::ConsensusWeights;
use crate::feedback::{DEFAULT_FALLBACK_CONFIDENCE, DEFAULT_MAX_REPAIR_ITERATIONS};
use crate::guardrails::{GuardrailBudget, DEFAULT_MAX_CALLS, DEFAULT_MAX_WALL_CLOCK_MS};
use crate::memory::DEFAULT_DECAY_TAU_DAYS;

/// Default per-expert timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 45_000;

/// Default similarity weight.
pub const DEFAULT_ALPHA: f64 = 0.7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("duplicate expert id: {0}")]
    DuplicateExpert(String),

    #[error("expert {expert_id} references unknown class {class}")]
    UnknownClass { expert_id: String, class: String },

    #[error("expert {0} is not configured")]
    UnknownExpert(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// `[context]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub decay_tau_days: f64,
    /// Memory hits requested from the store before ranking.
    pub candidate_pool: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            decay_tau_days: DEFAULT_DECAY_TAU_DAYS,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
        }
    }
}

/// `[defaults]` section: values every expert starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDefaults {
    pub alpha: f64,
    pub top_k: usize,
    pub max_calls: u32,
    pub max_wall_clock_ms: u64,
    pub timeout_ms: u64,
    pub max_repair_iterations: u32,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            top_k: DEFAULT_TOP_K,
            max_calls: DEFAULT_MAX_CALLS,
            max_wall_clock_ms: DEFAULT_MAX_WALL_CLOCK_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_repair_iterations: DEFAULT_MAX_REPAIR_ITERATIONS,
        }
    }
}

/// Partial profile used by classes and experts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wall_clock_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_repair_iterations: Option<u32>,
}

impl ProfileOverrides {
    fn apply(&self, profile: &mut ExpertProfile) {
        if let Some(alpha) = self.alpha {
            profile.alpha = alpha;
        }
        if let Some(top_k) = self.top_k {
            profile.top_k = top_k;
        }
        if let Some(max_calls) = self.max_calls {
            profile.budget.max_calls = max_calls;
        }
        if let Some(max_wall_clock_ms) = self.max_wall_clock_ms {
            profile.budget.max_wall_clock_ms = max_wall_clock_ms;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            profile.timeout_ms = timeout_ms;
        }
        if let Some(max_repair_iterations) = self.max_repair_iterations {
            profile.max_repair_iterations = max_repair_iterations;
        }
    }
}

/// One `[[experts]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Base URL of the HTTP expert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub overrides: ProfileOverrides,
}

/// `[fallback]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub confidence: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_FALLBACK_CONFIDENCE,
        }
    }
}

/// Fully resolved per-expert settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub expert_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub alpha: f64,
    pub top_k: usize,
    pub budget: GuardrailBudget,
    pub timeout_ms: u64,
    pub max_repair_iterations: u32,
}

impl ExpertProfile {
    /// Profile with built-in defaults.
    pub fn new(expert_id: impl Into<String>) -> Self {
        Self::from_defaults(expert_id, &ProfileDefaults::default())
    }

    fn from_defaults(expert_id: impl Into<String>, defaults: &ProfileDefaults) -> Self {
        Self {
            expert_id: expert_id.into(),
            class: None,
            alpha: defaults.alpha,
            top_k: defaults.top_k,
            budget: GuardrailBudget {
                max_calls: defaults.max_calls,
                max_wall_clock_ms: defaults.max_wall_clock_ms,
            },
            timeout_ms: defaults.timeout_ms,
            max_repair_iterations: defaults.max_repair_iterations,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_budget(mut self, budget: GuardrailBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_repair_iterations(mut self, max_repair_iterations: u32) -> Self {
        self.max_repair_iterations = max_repair_iterations;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn assembly_params(&self) -> AssemblyParams {
        AssemblyParams {
            top_k: self.top_k,
            alpha: self.alpha,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let key = |field: &str| format!("{}.{}", self.expert_id, field);
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::invalid(
                key("alpha"),
                format!("must be in [0, 1], got {}", self.alpha),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid(key("timeout_ms"), "must be positive"));
        }
        Ok(())
    }
}

/// Top-level council configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    pub context: ContextSettings,
    pub defaults: ProfileDefaults,
    pub classes: BTreeMap<String, ProfileOverrides>,
    pub experts: Vec<ExpertEntry>,
    pub consensus: ConsensusWeights,
    pub fallback: FallbackSettings,
}

impl CouncilConfig {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        config.apply_env()?;
        config.validate()?;
        debug!(path = %path.display(), experts = config.experts.len(), "council config loaded");
        Ok(config)
    }

    /// Parse TOML without environment overrides or validation.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `COUNCIL_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "COUNCIL_DECAY_TAU_DAYS")? {
            self.context.decay_tau_days = v;
        }
        if let Some(v) = parse_var(&lookup, "COUNCIL_TIMEOUT_MS")? {
            self.defaults.timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "COUNCIL_MAX_CALLS")? {
            self.defaults.max_calls = v;
        }
        if let Some(v) = parse_var(&lookup, "COUNCIL_MAX_REPAIR_ITERATIONS")? {
            self.defaults.max_repair_iterations = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tau = self.context.decay_tau_days;
        if !tau.is_finite() || tau <= 0.0 {
            return Err(ConfigError::invalid(
                "context.decay_tau_days",
                format!("must be positive, got {}", tau),
            ));
        }

        let w = &self.consensus;
        let parts = [w.overall, w.recent, w.confidence];
        if parts.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::invalid("consensus", "weights must be non-negative"));
        }
        if parts.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid("consensus", "weights must have a positive sum"));
        }

        let c = self.fallback.confidence;
        if !c.is_finite() || !(0.0..=1.0).contains(&c) {
            return Err(ConfigError::invalid(
                "fallback.confidence",
                format!("must be in [0, 1], got {}", c),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.experts {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateExpert(entry.id.clone()));
            }
            self.resolve(entry)?.validate()?;
        }
        Ok(())
    }

    /// Resolved profile for one configured expert.
    pub fn profile(&self, expert_id: &str) -> Result<ExpertProfile, ConfigError> {
        let entry = self
            .experts
            .iter()
            .find(|e| e.id == expert_id)
            .ok_or_else(|| ConfigError::UnknownExpert(expert_id.to_string()))?;
        self.resolve(entry)
    }

    /// Resolved profiles for every configured expert, in file order.
    pub fn profiles(&self) -> Result<Vec<ExpertProfile>, ConfigError> {
        self.experts.iter().map(|e| self.resolve(e)).collect()
    }

    fn resolve(&self, entry: &ExpertEntry) -> Result<ExpertProfile, ConfigError> {
        let mut profile = ExpertProfile::from_defaults(entry.id.clone(), &self.defaults);
        if let Some(class) = &entry.class {
            let overrides = self.classes.get(class).ok_or_else(|| ConfigError::UnknownClass {
                expert_id: entry.id.clone(),
                class: class.clone(),
            })?;
            overrides.apply(&mut profile);
            profile.class = Some(class.clone());
        }
        entry.overrides.apply(&mut profile);
        Ok(profile)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("{:?}: {}", raw, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [context]
        decay_tau_days = 60.0

        [defaults]
        alpha = 0.6
        max_calls = 4

        [classes.quant]
        alpha = 0.9
        top_k = 20
        max_calls = 3

        [consensus]
        overall = 0.5
        recent = 0.3
        confidence = 0.2

        [[experts]]
        id = "sharp"
        class = "quant"
        endpoint = "http://localhost:8090"
        max_calls = 6

        [[experts]]
        id = "contrarian"
    "#;

    #[test]
    fn test_defaults_without_file() {
        let config = CouncilConfig::default();
        assert_eq!(config.context.decay_tau_days, 90.0);
        assert_eq!(config.defaults.top_k, 10);
        assert_eq!(config.defaults.timeout_ms, 45_000);
        assert_eq!(config.consensus, ConsensusWeights::default());
        assert_eq!(config.fallback.confidence, 0.3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profile_resolution_order() {
        let config = CouncilConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        let sharp = config.profile("sharp").unwrap();
        assert_eq!(sharp.class.as_deref(), Some("quant"));
        assert_eq!(sharp.alpha, 0.9);
        assert_eq!(sharp.top_k, 20);
        assert_eq!(sharp.budget.max_calls, 6);
        assert_eq!(sharp.budget.max_wall_clock_ms, 45_000);

        let contrarian = config.profile("contrarian").unwrap();
        assert_eq!(contrarian.alpha, 0.6);
        assert_eq!(contrarian.top_k, 10);
        assert_eq!(contrarian.budget.max_calls, 4);

        assert_eq!(config.experts[0].endpoint.as_deref(), Some("http://localhost:8090"));
        assert!(matches!(
            config.profile("nobody"),
            Err(ConfigError::UnknownExpert(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = CouncilConfig::load(file.path()).unwrap();
        assert_eq!(config.experts.len(), 2);
        assert_eq!(config.profiles().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CouncilConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_style_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COUNCIL_DECAY_TAU_DAYS", "30"),
            ("COUNCIL_TIMEOUT_MS", "1000"),
            ("COUNCIL_MAX_REPAIR_ITERATIONS", "1"),
        ]
        .into_iter()
        .collect();
        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.context.decay_tau_days, 30.0);
        let contrarian = config.profile("contrarian").unwrap();
        assert_eq!(contrarian.timeout_ms, 1000);
        assert_eq!(contrarian.max_repair_iterations, 1);
        assert_eq!(contrarian.budget.max_calls, 4);

        let err = config
            .apply_overrides(|k| (k == "COUNCIL_MAX_CALLS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "COUNCIL_MAX_CALLS"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config.context.decay_tau_days = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config.consensus = ConsensusWeights {
            overall: 0.0,
            recent: 0.0,
            confidence: 0.0,
        };
        assert!(config.validate().is_err());

        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config.fallback.confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config.experts[1].overrides.alpha = Some(1.2);
        assert!(config.validate().is_err());

        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config.experts[1].id = "sharp".into();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateExpert(_))));

        let mut config = CouncilConfig::parse(SAMPLE).unwrap();
        config.experts[1].class = Some("oracle".into());
        assert!(matches!(config.validate(), Err(ConfigError::UnknownClass { .. })));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            CouncilConfig::parse("[defaults\nalpha = "),
            Err(ConfigError::Parse(_))
        ));
    }
}
