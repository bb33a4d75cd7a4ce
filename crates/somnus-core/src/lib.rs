//! Sleep-wake scheduling engine for an autonomous agent.
//!
//! An agent alternates between AWAKE stretches of heartbeats and SLEEPING
//! phases that digest its history and tool logs into long-term learnings.
//! Every rhythm parameter is sampled around a center that moves with the
//! agent's maturity, so a newborn naps constantly and an adult works long
//! shifts.
//!
//! Zero I/O. Persistence, transport, and the summarizer live elsewhere.

pub mod constants;
pub mod cycle;
pub mod digest;
pub mod error;
pub mod outcome;
pub mod profile;
pub mod record;
pub mod rhythm;
pub mod sampler;
pub mod time;

pub use constants::{DEFAULT_REPLAY_RATIO, EMPTY_LEARNINGS, MAX_REPLAY, MIN_REPLAY};
pub use cycle::{DaemonState, HeartbeatVerdict, Phase};
pub use digest::{
    Chunk, ChunkKind, ChunkSizes, DigestCursors, DigestPlan, LogKind, chunk_range, plan_digest,
    replay_count,
};
pub use error::InvariantViolation;
pub use outcome::{DigestOutcome, DigestStatus};
pub use profile::{GrowthProfile, ResamplePolicy};
pub use record::{ChunkText, render_history, render_tool_log};
pub use rhythm::{
    PhaseParams, maturity_baseline, sample_capacity, sample_cooldown, sample_maturity,
    sample_min_awake, sample_replay_ratio, sleep_probability,
};
pub use sampler::{ScriptedVariate, Variate, clamp};
pub use time::UnixTime;
