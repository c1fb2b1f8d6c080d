use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default distance below which a face counts as matched.
pub const DEFAULT_T_LOW: f64 = 60.0;
/// Default distance at or above which a face counts as unknown.
pub const DEFAULT_T_HIGH: f64 = 85.0;

#[derive(Error, Debug, PartialEq)]
#[error("confidence thresholds must satisfy 0 <= t_low < t_high, got t_low={t_low}, t_high={t_high}")]
pub struct TierError {
    pub t_low: f64,
    pub t_high: f64,
}

/// Confidence tier of a classification distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Matched,
    Uncertain,
    Unknown,
}

/// Two fixed thresholds splitting the distance axis into three tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceTiers {
    t_low: f64,
    t_high: f64,
}

impl Default for ConfidenceTiers {
    fn default() -> Self {
        Self {
            t_low: DEFAULT_T_LOW,
            t_high: DEFAULT_T_HIGH,
        }
    }
}

impl ConfidenceTiers {
    pub fn new(t_low: f64, t_high: f64) -> Result<Self, TierError> {
        // Also rejects NaN
        if !(t_low >= 0.0 && t_low < t_high) {
            return Err(TierError { t_low, t_high });
        }
        Ok(Self { t_low, t_high })
    }

    pub fn t_low(&self) -> f64 {
        self.t_low
    }

    pub fn t_high(&self) -> f64 {
        self.t_high
    }

    /// `[0, t_low)` Matched, `[t_low, t_high)` Uncertain, everything else Unknown.
    pub fn tier(&self, distance: f64) -> Tier {
        if distance < self.t_low {
            Tier::Matched
        } else if distance < self.t_high {
            Tier::Uncertain
        } else {
            Tier::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        let tiers = ConfidenceTiers::new(60.0, 85.0).unwrap();
        assert_eq!(tiers.tier(0.0), Tier::Matched);
        assert_eq!(tiers.tier(59.999), Tier::Matched);
        assert_eq!(tiers.tier(60.0), Tier::Uncertain);
        assert_eq!(tiers.tier(84.999), Tier::Uncertain);
        assert_eq!(tiers.tier(85.0), Tier::Unknown);
        assert_eq!(tiers.tier(f64::INFINITY), Tier::Unknown);
    }

    #[test]
    fn test_nan_distance_is_unknown() {
        assert_eq!(ConfidenceTiers::default().tier(f64::NAN), Tier::Unknown);
    }

    #[test]
    fn test_tiering_is_monotonic() {
        let tiers = ConfidenceTiers::new(12.5, 40.0).unwrap();
        let mut prev = Tier::Matched;
        for step in 0..1000 {
            let t = tiers.tier(step as f64 * 0.1);
            assert!(t >= prev, "tier went from {prev:?} to {t:?} at {step}");
            prev = t;
        }
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        assert!(ConfidenceTiers::new(85.0, 60.0).is_err());
        assert!(ConfidenceTiers::new(60.0, 60.0).is_err());
        assert!(ConfidenceTiers::new(-1.0, 60.0).is_err());
        assert!(ConfidenceTiers::new(f64::NAN, 60.0).is_err());
    }
}
