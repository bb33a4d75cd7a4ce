//! `somnus.toml` plus environment overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use somnus_core::{ChunkSizes, DEFAULT_REPLAY_RATIO, GrowthProfile};

use crate::retry::{BackoffConfig, RetryPolicy};

pub const KERNEL_URL_ENV: &str = "SOMNUS_KERNEL_URL";

pub const BOOT_MESSAGE: &str =
    "You just booted. Read /repo/LAYOUT.md to orient yourself, then decide what to do.";
pub const HEARTBEAT_MESSAGE: &str = "Continue. What's next?";

/// Longest failure pause or ping interval a config may ask for, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub growth: GrowthProfile,
    pub digest: DigestConfig,
    pub kernel: KernelConfig,
    pub persistence: PersistenceConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub history_chunk: usize,
    pub tool_log_chunk: usize,
    /// Ratio for operator digests that do not name one.
    pub default_replay_ratio: f64,
    /// Per-chunk summarizer retries.
    pub retry: RetryPolicy,
    /// Mirror of the learnings, rewritten after every chunk, for the agent to read.
    pub learnings_path: Option<PathBuf>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        let sizes = ChunkSizes::default();
        Self {
            history_chunk: sizes.history,
            tool_log_chunk: sizes.tool_log,
            default_replay_ratio: DEFAULT_REPLAY_RATIO,
            retry: RetryPolicy::default(),
            learnings_path: None,
        }
    }
}

impl DigestConfig {
    pub fn sizes(&self) -> ChunkSizes {
        ChunkSizes {
            history: self.history_chunk,
            tool_log: self.tool_log_chunk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub url: String,
    pub history_path: PathBuf,
    pub tool_log_path: PathBuf,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Interval between readiness pings before the daemon starts.
    pub ping_interval_secs: f64,
    pub heartbeat_retry: RetryPolicy,
    /// Extra wait after a heartbeat that failed every attempt.
    pub failure_pause_secs: f64,
    pub boot_message: String,
    pub heartbeat_message: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".into(),
            history_path: PathBuf::from("/repo/.memory/chat_history.json"),
            tool_log_path: PathBuf::from("/repo/.memory/tool_log.jsonl"),
            request_timeout_secs: 600,
            connect_timeout_secs: 10,
            ping_interval_secs: 2.0,
            heartbeat_retry: RetryPolicy::once(),
            failure_pause_secs: 30.0,
            boot_message: BOOT_MESSAGE.into(),
            heartbeat_message: HEARTBEAT_MESSAGE.into(),
        }
    }
}

impl KernelConfig {
    pub fn failure_pause(&self) -> Duration {
        Duration::from_secs_f64(self.failure_pause_secs.max(0.0))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval_secs.max(0.1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    /// Pending operator commands before the API answers 503.
    pub queue: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], 7878)),
            queue: 16,
        }
    }
}

impl Config {
    /// Read `path` if it exists, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text)
                .with_context(|| format!("invalid config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overrides from the environment. `lookup` is injected for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(KERNEL_URL_ENV) {
            self.kernel.url = url;
        }
        if let Some(v) = lookup("MATURITY_CYCLES") {
            self.growth.maturity_cycles = v
                .trim()
                .parse()
                .with_context(|| format!("MATURITY_CYCLES={v}"))?;
        }
        if let Some(v) = lookup("GROWTH_CURVE") {
            self.growth.growth_curve = v
                .trim()
                .parse()
                .with_context(|| format!("GROWTH_CURVE={v}"))?;
        }
        if let Some(v) = lookup("MATURITY_JITTER") {
            self.growth.jitter = v
                .trim()
                .parse()
                .with_context(|| format!("MATURITY_JITTER={v}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.growth
            .validate()
            .map_err(|e| anyhow::anyhow!("[growth] {e}"))?;
        if self.digest.history_chunk == 0 || self.digest.tool_log_chunk == 0 {
            bail!("[digest] chunk sizes must be at least 1");
        }
        validate_replay_ratio(self.digest.default_replay_ratio)
            .context("[digest] default_replay_ratio")?;
        for (name, secs) in [
            ("failure_pause_secs", self.kernel.failure_pause_secs),
            ("ping_interval_secs", self.kernel.ping_interval_secs),
        ] {
            if !(0.0..=MAX_INTERVAL_SECS).contains(&secs) {
                bail!("[kernel] {name} must be between 0 and {MAX_INTERVAL_SECS}, got {secs}");
            }
        }
        if self.control.queue == 0 {
            bail!("[control] queue must be at least 1");
        }
        Ok(())
    }
}

pub fn validate_replay_ratio(ratio: f64) -> Result<()> {
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        bail!("replay ratio must be a finite number in [0, 1], got {ratio}");
    }
    Ok(())
}
