//! Maturity-scaled samplers for the sleep-wake rhythm.
//!
//! Every parameter is drawn from a distribution centered on a value that
//! interpolates between a newborn and an adult setting. A newborn sleeps after
//! a heartbeat or two and replays heavily; an adult stays awake for long
//! stretches with slow heartbeats and mostly digests new material.

use serde::{Deserialize, Serialize};

use crate::constants::{
    AWAKE_SPREAD, CAPACITY_FLOOR, COOLDOWN_CEILING, COOLDOWN_FLOOR, COOLDOWN_SPREAD, MAX_CAPACITY,
    MAX_COOLDOWN, MAX_GUARANTEED, MAX_REPLAY, MIN_CAPACITY, MIN_COOLDOWN, MIN_GUARANTEED,
    MIN_REPLAY, REPLAY_BASE, REPLAY_JITTER, REPLAY_SLOPE,
};
use crate::error::{InvariantViolation, Result};
use crate::profile::GrowthProfile;
use crate::sampler::{Variate, clamp};

fn lerp(lo: f64, hi: f64, t: f64) -> f64 {
    lo + (hi - lo) * t
}

/// Deterministic part of the maturity curve: `min(1, cycles/N)^curve`.
pub fn maturity_baseline(cycles: u64, profile: &GrowthProfile) -> f64 {
    let t = (cycles as f64 / profile.maturity_cycles.max(1) as f64).min(1.0);
    t.powf(profile.growth_curve)
}

/// Life-stage scalar in `[0, 1]`, jittered around the growth curve.
pub fn sample_maturity(cycles: u64, profile: &GrowthProfile, v: &mut impl Variate) -> f64 {
    let noisy = maturity_baseline(cycles, profile) + v.uniform(-profile.jitter, profile.jitter);
    clamp(noisy, 0.0, 1.0)
}

/// Heartbeats guaranteed before any sleep check. Never below 1.
///
/// Halves round to even.
pub fn sample_min_awake(maturity: f64, v: &mut impl Variate) -> u32 {
    let center = lerp(MIN_GUARANTEED, MAX_GUARANTEED, maturity);
    let sampled = (center * v.uniform(AWAKE_SPREAD.0, AWAKE_SPREAD.1)).round_ties_even();
    if sampled.is_nan() || sampled < 1.0 {
        1
    } else {
        sampled as u32
    }
}

/// Scale of the exponential sleep pressure once the guarantee is used up.
pub fn sample_capacity(maturity: f64, v: &mut impl Variate) -> f64 {
    let center = lerp(MIN_CAPACITY, MAX_CAPACITY, maturity);
    (center * v.uniform(AWAKE_SPREAD.0, AWAKE_SPREAD.1)).max(CAPACITY_FLOOR)
}

/// Seconds to wait between heartbeats.
pub fn sample_cooldown(maturity: f64, v: &mut impl Variate) -> f64 {
    let center = lerp(MIN_COOLDOWN, MAX_COOLDOWN, maturity);
    (center * v.uniform(COOLDOWN_SPREAD.0, COOLDOWN_SPREAD.1)).max(COOLDOWN_FLOOR)
}

/// Share of digest effort spent replaying already-digested memories.
pub fn sample_replay_ratio(maturity: f64, v: &mut impl Variate) -> f64 {
    let center = REPLAY_BASE - REPLAY_SLOPE * maturity;
    clamp(
        center + v.uniform(-REPLAY_JITTER, REPLAY_JITTER),
        MIN_REPLAY,
        MAX_REPLAY,
    )
}

/// `1 - exp(-overtime / capacity)`: exactly 0 at no overtime, tends to 1.
pub fn sleep_probability(overtime: u32, capacity: f64) -> f64 {
    if overtime == 0 {
        return 0.0;
    }
    1.0 - (-(overtime as f64) / capacity).exp()
}

/// Parameters drawn at the start of an awake phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseParams {
    pub maturity: f64,
    pub min_awake: u32,
    pub capacity: f64,
    pub cooldown_secs: f64,
}

impl PhaseParams {
    /// Draw maturity first, then the window, capacity and cooldown it scales.
    pub fn sample(cycles: u64, profile: &GrowthProfile, v: &mut impl Variate) -> Result<Self> {
        let maturity = sample_maturity(cycles, profile, v);
        let params = Self {
            maturity,
            min_awake: sample_min_awake(maturity, v),
            capacity: sample_capacity(maturity, v),
            cooldown_secs: sample_cooldown(maturity, v),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.maturity) {
            return Err(InvariantViolation::MaturityOutOfRange(self.maturity));
        }
        if self.min_awake < 1 {
            return Err(InvariantViolation::MinAwakeBelowOne(self.min_awake));
        }
        if !self.capacity.is_finite() || self.capacity < CAPACITY_FLOOR {
            return Err(InvariantViolation::CapacityBelowFloor(self.capacity));
        }
        if !(COOLDOWN_FLOOR..=COOLDOWN_CEILING).contains(&self.cooldown_secs) {
            return Err(InvariantViolation::CooldownOutOfRange(self.cooldown_secs));
        }
        Ok(())
    }
}
