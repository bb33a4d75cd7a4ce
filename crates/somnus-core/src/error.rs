use std::fmt;

/// A computed scheduler value broke its contract.
///
/// Clamps in the samplers are policy and never produce this. It only fires
/// when something upstream (a bad profile, corrupt persisted state) pushes a
/// value outside the range the state machine relies on.
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    MaturityOutOfRange(f64),
    MinAwakeBelowOne(u32),
    CapacityBelowFloor(f64),
    CooldownOutOfRange(f64),
    ReplayRatioOutOfRange(f64),
    MissingReplayRatio,
    NotAwake,
    NotSleeping,
    InvalidProfile(String),
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaturityOutOfRange(m) => write!(f, "maturity {m} outside [0, 1]"),
            Self::MinAwakeBelowOne(n) => write!(f, "min_awake {n} below 1"),
            Self::CapacityBelowFloor(c) => write!(f, "capacity {c} below floor"),
            Self::CooldownOutOfRange(c) => write!(f, "cooldown {c}s outside the allowed range"),
            Self::ReplayRatioOutOfRange(r) => write!(f, "replay ratio {r} outside [0, 1]"),
            Self::MissingReplayRatio => write!(f, "sleeping without a replay ratio"),
            Self::NotAwake => write!(f, "heartbeat recorded while not awake"),
            Self::NotSleeping => write!(f, "wake requested while not sleeping"),
            Self::InvalidProfile(msg) => write!(f, "invalid growth profile: {msg}"),
        }
    }
}

impl std::error::Error for InvariantViolation {}

pub type Result<T> = std::result::Result<T, InvariantViolation>;
