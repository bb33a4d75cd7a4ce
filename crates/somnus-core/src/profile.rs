use serde::{Deserialize, Serialize};

use crate::constants::{GROWTH_CURVE, MATURITY_CYCLES, MATURITY_JITTER};
use crate::error::{InvariantViolation, Result};

/// When `capacity` and `cooldown` are redrawn during an awake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplePolicy {
    /// Once at the start of each awake phase. Keeps the pressure curve coherent.
    #[default]
    PerPhase,
    /// Before every sleep check.
    PerHeartbeat,
}

/// Shape of the maturity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthProfile {
    pub maturity_cycles: u64,
    pub growth_curve: f64,
    pub jitter: f64,
    pub resample: ResamplePolicy,
}

impl Default for GrowthProfile {
    fn default() -> Self {
        Self {
            maturity_cycles: MATURITY_CYCLES,
            growth_curve: GROWTH_CURVE,
            jitter: MATURITY_JITTER,
            resample: ResamplePolicy::PerPhase,
        }
    }
}

impl GrowthProfile {
    /// Exponent above 1: slow start, late growth spurt.
    pub fn late_bloomer() -> Self {
        Self {
            growth_curve: 2.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.growth_curve.is_finite() || self.growth_curve <= 0.0 {
            return Err(InvariantViolation::InvalidProfile(format!(
                "growth_curve must be finite and positive, got {}",
                self.growth_curve
            )));
        }
        if !self.jitter.is_finite() || !(0.0..=0.5).contains(&self.jitter) {
            return Err(InvariantViolation::InvalidProfile(format!(
                "jitter must be within [0, 0.5], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(GrowthProfile::default().validate().is_ok());
        assert!(GrowthProfile::late_bloomer().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_curve() {
        let p = GrowthProfile {
            growth_curve: 0.0,
            ..GrowthProfile::default()
        };
        assert!(p.validate().is_err());

        let p = GrowthProfile {
            growth_curve: f64::NAN,
            ..GrowthProfile::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_jitter() {
        let p = GrowthProfile {
            jitter: -0.1,
            ..GrowthProfile::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_resample_policy_serde_names() {
        let json = serde_json::to_string(&ResamplePolicy::PerHeartbeat).unwrap();
        assert_eq!(json, "\"per_heartbeat\"");
        let parsed: GrowthProfile = serde_json::from_str(r#"{"resample":"per_phase"}"#).unwrap();
        assert_eq!(parsed.resample, ResamplePolicy::PerPhase);
        assert_eq!(parsed.maturity_cycles, MATURITY_CYCLES);
    }
}
