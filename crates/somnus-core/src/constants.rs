/// Cycles until the growth curve reaches full maturity.
pub const MATURITY_CYCLES: u64 = 500;

/// Growth curve exponent. Below 1 front-loads growth, above 1 is a late bloomer.
pub const GROWTH_CURVE: f64 = 0.5;

/// Half-width of the uniform jitter added to the maturity curve.
pub const MATURITY_JITTER: f64 = 0.05;

/// Guaranteed awake heartbeats at maturity 0 and 1.
pub const MIN_GUARANTEED: f64 = 1.0;
pub const MAX_GUARANTEED: f64 = 8.0;

/// Awake capacity (sleep pressure scale) at maturity 0 and 1.
pub const MIN_CAPACITY: f64 = 1.0;
pub const MAX_CAPACITY: f64 = 6.0;

/// Floor for a sampled awake capacity.
pub const CAPACITY_FLOOR: f64 = 0.5;

/// Seconds between heartbeats at maturity 0 and 1.
pub const MIN_COOLDOWN: f64 = 5.0;
pub const MAX_COOLDOWN: f64 = 30.0;

/// Floor for a sampled cooldown, in seconds.
pub const COOLDOWN_FLOOR: f64 = 2.0;

/// Largest cooldown a phase may carry, in seconds. Sampling never comes near it.
pub const COOLDOWN_CEILING: f64 = 3600.0;

/// Multiplicative spread applied to the awake window and capacity centers.
pub const AWAKE_SPREAD: (f64, f64) = (0.7, 1.3);

/// Multiplicative spread applied to the cooldown center.
pub const COOLDOWN_SPREAD: (f64, f64) = (0.6, 1.4);

/// Replay ratio center is `REPLAY_BASE - REPLAY_SLOPE * m`.
pub const REPLAY_BASE: f64 = 0.5;
pub const REPLAY_SLOPE: f64 = 0.4;

/// Half-width of the additive jitter on the replay ratio.
pub const REPLAY_JITTER: f64 = 0.08;

/// Bounds of a sampled replay ratio.
pub const MIN_REPLAY: f64 = 0.05;
pub const MAX_REPLAY: f64 = 0.60;

/// Replay ratio used by manual digests that do not supply one.
pub const DEFAULT_REPLAY_RATIO: f64 = 0.15;

/// Records per history chunk.
pub const HISTORY_CHUNK_SIZE: usize = 10;

/// Records per tool-log chunk.
pub const TOOL_LOG_CHUNK_SIZE: usize = 20;

/// Slack subtracted before `ceil` so `10 * 0.3` plans 3 replays, not 4.
pub const CEIL_EPSILON: f64 = 1e-9;

/// Learnings text handed to the summarizer before anything has been digested.
pub const EMPTY_LEARNINGS: &str = "(no learnings yet)";
