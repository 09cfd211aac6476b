//! Recency blending
//!
//! ```text
//! recency        = exp(-age_days / tau)
//! combined_score = alpha * similarity + (1 - alpha) * recency
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default decay constant in days.
pub const DEFAULT_DECAY_TAU_DAYS: f64 = 90.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Exponential recency decay with a fixed time constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyDecay {
    /// Decay constant tau in days (> 0).
    pub tau_days: f64,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self {
            tau_days: DEFAULT_DECAY_TAU_DAYS,
        }
    }
}

impl RecencyDecay {
    pub fn new(tau_days: f64) -> Self {
        Self { tau_days }
    }

    /// Tau must be finite and positive, otherwise scores degenerate to NaN.
    pub fn is_valid(&self) -> bool {
        self.tau_days.is_finite() && self.tau_days > 0.0
    }

    /// Age of `timestamp` relative to `as_of`, in fractional days.
    ///
    /// Records stamped after `as_of` count as age zero.
    pub fn age_days(timestamp: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        let millis = (as_of - timestamp).num_milliseconds().max(0);
        millis as f64 / MILLIS_PER_DAY
    }

    /// Recency score in (0, 1].
    pub fn score(&self, timestamp: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        (-Self::age_days(timestamp, as_of) / self.tau_days).exp()
    }
}

/// Blend a similarity and a recency score with weight `alpha` on similarity.
pub fn blend(alpha: f64, similarity: f64, recency: f64) -> f64 {
    alpha * similarity + (1.0 - alpha) * recency
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_fresh_record_scores_one() {
        let decay = RecencyDecay::default();
        assert!((decay.score(as_of(), as_of()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_one_tau_decays_to_e_inverse() {
        let decay = RecencyDecay::default();
        let ts = as_of() - Duration::days(90);
        let expected = (-1.0f64).exp();
        assert!((decay.score(ts, as_of()) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_future_record_clamped() {
        let ts = as_of() + Duration::days(3);
        assert_eq!(RecencyDecay::age_days(ts, as_of()), 0.0);
    }

    #[test]
    fn test_shorter_tau_decays_faster() {
        let ts = as_of() - Duration::days(30);
        let slow = RecencyDecay::new(90.0).score(ts, as_of());
        let fast = RecencyDecay::new(10.0).score(ts, as_of());
        assert!(fast < slow);
    }

    #[test]
    fn test_tau_validity() {
        assert!(RecencyDecay::default().is_valid());
        assert!(RecencyDecay::new(0.5).is_valid());
        assert!(!RecencyDecay::new(0.0).is_valid());
        assert!(!RecencyDecay::new(-3.0).is_valid());
        assert!(!RecencyDecay::new(f64::NAN).is_valid());
        assert!(!RecencyDecay::new(f64::INFINITY).is_valid());
    }

    #[test]
    fn test_blend_endpoints() {
        assert_eq!(blend(1.0, 0.4, 0.9), 0.4);
        assert_eq!(blend(0.0, 0.4, 0.9), 0.9);
        assert!((blend(0.5, 0.4, 0.8) - 0.6).abs() < 1e-12);
    }
}
