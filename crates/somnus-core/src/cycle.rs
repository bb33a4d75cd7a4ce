//! AWAKE/SLEEPING state machine.
//!
//! `DaemonState` is a plain value. Each transition takes `&self`, computes the
//! successor on a copy, validates it, and hands it back. The caller persists
//! the successor and only then adopts it, so a failed transition leaves the
//! last-known-good state untouched.

use serde::{Deserialize, Serialize};

use crate::error::{InvariantViolation, Result};
use crate::profile::{GrowthProfile, ResamplePolicy};
use crate::rhythm::{
    PhaseParams, sample_capacity, sample_cooldown, sample_replay_ratio, sleep_probability,
};
use crate::sampler::Variate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Awake,
    Sleeping,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Awake => write!(f, "awake"),
            Phase::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Persisted scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    /// Completed sleep phases.
    pub cycles: u64,
    pub phase: Phase,
    /// Heartbeats in the current awake phase.
    pub awake_count: u32,
    pub min_awake: u32,
    pub capacity: f64,
    pub cooldown_secs: f64,
    /// Maturity drawn for the current cycle.
    pub maturity: f64,
    /// Fixed at sleep onset and kept until wake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_ratio: Option<f64>,
}

/// What the state machine concluded after one heartbeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatVerdict {
    pub awake_count: u32,
    /// True while inside the guaranteed window; no roll was drawn.
    pub guaranteed: bool,
    pub overtime: u32,
    pub p_sleep: f64,
    pub roll: Option<f64>,
    pub sleep: bool,
}

impl DaemonState {
    /// Fresh state for a brand-new agent: cycle 0, awake.
    pub fn genesis(profile: &GrowthProfile, v: &mut impl Variate) -> Result<Self> {
        let params = PhaseParams::sample(0, profile, v)?;
        Ok(Self::awake_with(0, params))
    }

    fn awake_with(cycles: u64, params: PhaseParams) -> Self {
        Self {
            cycles,
            phase: Phase::Awake,
            awake_count: 0,
            min_awake: params.min_awake,
            capacity: params.capacity,
            cooldown_secs: params.cooldown_secs,
            maturity: params.maturity,
            replay_ratio: None,
        }
    }

    pub fn params(&self) -> PhaseParams {
        PhaseParams {
            maturity: self.maturity,
            min_awake: self.min_awake,
            capacity: self.capacity,
            cooldown_secs: self.cooldown_secs,
        }
    }

    pub fn is_awake(&self) -> bool {
        self.phase == Phase::Awake
    }

    /// Heartbeats past the guaranteed window.
    pub fn overtime(&self) -> u32 {
        self.awake_count.saturating_sub(self.min_awake)
    }

    /// Check every field against its contract.
    pub fn validate(&self) -> Result<()> {
        self.params().validate()?;
        match (self.phase, self.replay_ratio) {
            (Phase::Sleeping, None) => Err(InvariantViolation::MissingReplayRatio),
            (_, Some(r)) if !r.is_finite() || !(0.0..=1.0).contains(&r) => {
                Err(InvariantViolation::ReplayRatioOutOfRange(r))
            }
            _ => Ok(()),
        }
    }

    /// Account for one completed heartbeat and decide whether to fall asleep.
    ///
    /// The count is incremented first. Inside the guaranteed window no roll is
    /// drawn at all. Past it, `roll < p_sleep` moves the successor to
    /// SLEEPING with a freshly sampled replay ratio.
    pub fn after_heartbeat(
        &self,
        profile: &GrowthProfile,
        v: &mut impl Variate,
    ) -> Result<(DaemonState, HeartbeatVerdict)> {
        if !self.is_awake() {
            return Err(InvariantViolation::NotAwake);
        }

        let mut next = self.clone();
        next.awake_count = next.awake_count.saturating_add(1);

        if profile.resample == ResamplePolicy::PerHeartbeat {
            next.capacity = sample_capacity(next.maturity, v);
            next.cooldown_secs = sample_cooldown(next.maturity, v);
        }

        if next.awake_count < next.min_awake {
            next.validate()?;
            let verdict = HeartbeatVerdict {
                awake_count: next.awake_count,
                guaranteed: true,
                overtime: 0,
                p_sleep: 0.0,
                roll: None,
                sleep: false,
            };
            return Ok((next, verdict));
        }

        let overtime = next.overtime();
        let p_sleep = sleep_probability(overtime, next.capacity);
        let roll = v.unit();
        let sleep = roll < p_sleep;
        if sleep {
            next.phase = Phase::Sleeping;
            next.replay_ratio = Some(sample_replay_ratio(next.maturity, v));
        }
        next.validate()?;

        let verdict = HeartbeatVerdict {
            awake_count: next.awake_count,
            guaranteed: false,
            overtime,
            p_sleep,
            roll: Some(roll),
            sleep,
        };
        Ok((next, verdict))
    }

    /// Operator-forced sleep. `replay_ratio` of `None` samples one as a
    /// natural sleep onset would.
    pub fn fall_asleep(&self, replay_ratio: Option<f64>, v: &mut impl Variate) -> Result<Self> {
        if !self.is_awake() {
            return Err(InvariantViolation::NotAwake);
        }
        let mut next = self.clone();
        next.phase = Phase::Sleeping;
        next.replay_ratio =
            Some(replay_ratio.unwrap_or_else(|| sample_replay_ratio(next.maturity, v)));
        next.validate()?;
        Ok(next)
    }

    /// End of a sleep phase, whether the digest completed or aborted.
    /// Starts the next cycle with freshly drawn phase parameters.
    pub fn wake(&self, profile: &GrowthProfile, v: &mut impl Variate) -> Result<Self> {
        if self.is_awake() {
            return Err(InvariantViolation::NotSleeping);
        }
        let cycles = self.cycles + 1;
        let params = PhaseParams::sample(cycles, profile, v)?;
        Ok(Self::awake_with(cycles, params))
    }

    /// Awake at the same cycle count with freshly drawn parameters. Used to
    /// recover from a persisted state that no longer validates.
    pub fn restart_cycle(&self, profile: &GrowthProfile, v: &mut impl Variate) -> Result<Self> {
        let params = PhaseParams::sample(self.cycles, profile, v)?;
        Ok(Self::awake_with(self.cycles, params))
    }

    /// Replay ratio for the digest of this sleep phase. States persisted
    /// without one (older versions) get a fresh sample.
    pub fn sleep_replay_ratio(&self, v: &mut impl Variate) -> f64 {
        self.replay_ratio
            .unwrap_or_else(|| sample_replay_ratio(self.maturity, v))
    }
}
