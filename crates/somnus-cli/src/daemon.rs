//! The sleep-wake loop.
//!
//! One task owns the state, the store and the kernel handle. Heartbeats and
//! digest chunks run strictly one after another; operator commands and
//! shutdown are only acted on between them.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use somnus_core::{DaemonState, DigestOutcome, GrowthProfile, Variate};
use somnus_store::{LogSource, StateStore, StateStoreExt, StoreError};

use crate::config::Config;
use crate::digest::{DigestExecutor, DigestProgress, DigestSettings, Interrupt};
use crate::kernel::{DigestSummarizer, HeartbeatExecutor, preview};
use crate::retry::{BackoffConfig, Cancelled, RetryPolicy, pause, persist};

/// Operator requests delivered to the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Sleep,
    Wake,
    /// Sleep now and digest with this replay ratio.
    Digest { replay_ratio: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activity {
    Starting,
    Heartbeat { count: u32 },
    Cooldown { secs: f64 },
    Digesting(DigestProgress),
    Stopped,
}

/// What `GET /status` reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: Option<DaemonState>,
    pub activity: Activity,
    pub last_digest: Option<DigestOutcome>,
    /// Most recent invariant violation or failed heartbeat.
    pub last_error: Option<String>,
    /// Heartbeats sent since the process started.
    pub heartbeats: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: None,
            activity: Activity::Starting,
            last_digest: None,
            last_error: None,
            heartbeats: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub growth: GrowthProfile,
    pub digest: DigestSettings,
    pub heartbeat_retry: RetryPolicy,
    pub failure_pause: Duration,
    pub boot_message: String,
    pub heartbeat_message: String,
}

impl DaemonSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            growth: config.growth.clone(),
            digest: DigestSettings {
                sizes: config.digest.sizes(),
                retry: config.digest.retry.clone(),
                persistence: config.persistence.backoff.clone(),
                learnings_path: config.digest.learnings_path.clone(),
            },
            heartbeat_retry: config.kernel.heartbeat_retry.clone(),
            failure_pause: config.kernel.failure_pause(),
            boot_message: config.kernel.boot_message.clone(),
            heartbeat_message: config.kernel.heartbeat_message.clone(),
        }
    }

    fn persistence(&self) -> &BackoffConfig {
        &self.digest.persistence
    }
}

pub struct Daemon<S, K, L, V> {
    store: S,
    kernel: K,
    logs: L,
    rng: V,
    settings: DaemonSettings,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    status: watch::Sender<StatusSnapshot>,
    cancel: CancellationToken,
    booted: bool,
}

impl<S, K, L, V> Daemon<S, K, L, V>
where
    S: StateStore,
    K: HeartbeatExecutor + DigestSummarizer,
    L: LogSource,
    V: Variate,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        kernel: K,
        logs: L,
        rng: V,
        settings: DaemonSettings,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<StatusSnapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            kernel,
            logs,
            rng,
            settings,
            commands,
            commands_open: true,
            status,
            cancel,
            booted: false,
        }
    }

    /// Run until shutdown. Only configuration problems end the loop early.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let result = self.drive().await;
        self.status.send_modify(|s| s.activity = Activity::Stopped);
        match result {
            Ok(Err(Cancelled)) | Ok(Ok(())) => {
                tracing::info!("daemon stopped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(&mut self) -> anyhow::Result<Result<(), Cancelled>> {
        let mut state = match self.load_state().await? {
            Ok(state) => state,
            Err(Cancelled) => return Ok(Err(Cancelled)),
        };
        tracing::info!(
            "starting in {} at cycle {} (maturity {:.3}, awake {}/{}, cooldown {:.1}s)",
            state.phase,
            state.cycles,
            state.maturity,
            state.awake_count,
            state.min_awake,
            state.cooldown_secs
        );
        while !self.cancel.is_cancelled() {
            let step = if state.is_awake() {
                self.awake_step(&mut state).await
            } else {
                self.sleep_phase(&mut state).await
            };
            if step.is_err() {
                return Ok(Err(Cancelled));
            }
        }
        Ok(Ok(()))
    }

    /// Stored state, repaired or created when needed. Fails only when the
    /// growth profile cannot produce valid parameters.
    async fn load_state(&mut self) -> anyhow::Result<Result<DaemonState, Cancelled>> {
        let last_digest = persist(
            "load last digest",
            self.settings.persistence(),
            &self.cancel,
            || match self.store.last_digest() {
                Err(StoreError::Json(e)) => {
                    tracing::warn!("stored digest outcome unreadable: {e}");
                    Ok(None)
                }
                other => other,
            },
        )
        .await;
        match last_digest {
            Ok(outcome) => self.status.send_modify(|s| s.last_digest = outcome),
            Err(Cancelled) => return Ok(Err(Cancelled)),
        }

        let loaded = persist(
            "load daemon state",
            self.settings.persistence(),
            &self.cancel,
            || match self.store.load_state() {
                Err(StoreError::Json(e)) => Ok(Err(e.to_string())),
                other => other.map(Ok),
            },
        )
        .await;
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(Cancelled) => return Ok(Err(Cancelled)),
        };

        let profile = &self.settings.growth;
        let fresh = match loaded {
            Ok(Some(state)) => match state.validate() {
                Ok(()) => {
                    self.publish_state(&state);
                    return Ok(Ok(state));
                }
                Err(e) => {
                    tracing::error!(
                        "stored state failed validation ({e}); restarting cycle {}",
                        state.cycles
                    );
                    self.note_error(format!("stored state invalid: {e}"));
                    state.restart_cycle(profile, &mut self.rng)?
                }
            },
            Ok(None) => {
                tracing::info!("no stored state; starting a newborn agent");
                DaemonState::genesis(profile, &mut self.rng)?
            }
            Err(e) => {
                tracing::error!("stored state unreadable ({e}); starting a newborn agent");
                self.note_error(format!("stored state unreadable: {e}"));
                DaemonState::genesis(profile, &mut self.rng)?
            }
        };
        let mut state = fresh.clone();
        if self.commit(&mut state, fresh).await.is_err() {
            return Ok(Err(Cancelled));
        }
        Ok(Ok(state))
    }

    async fn awake_step(&mut self, state: &mut DaemonState) -> Result<(), Cancelled> {
        if let Some(ratio) = self.queued_sleep_request() {
            self.force_sleep(state, ratio).await?;
            if !state.is_awake() {
                return Ok(());
            }
        }

        let message = if self.booted {
            self.settings.heartbeat_message.clone()
        } else {
            self.settings.boot_message.clone()
        };
        let count = state.awake_count.saturating_add(1);
        self.status
            .send_modify(|s| s.activity = Activity::Heartbeat { count });
        let delivered = self.heartbeat(&message).await?;
        self.booted = true;
        self.status.send_modify(|s| s.heartbeats += 1);

        let (next, verdict) = match state.after_heartbeat(&self.settings.growth, &mut self.rng) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("heartbeat accounting rejected: {e}; keeping cycle {} state", state.cycles);
                self.note_error(e.to_string());
                return self.cooldown(state, self.settings.failure_pause).await;
            }
        };
        self.commit(state, next).await?;

        if verdict.guaranteed {
            tracing::info!(
                "heartbeat {}/{} (guaranteed)",
                verdict.awake_count,
                state.min_awake
            );
        } else {
            tracing::info!(
                "heartbeat {} (overtime {}): p_sleep={:.3} roll={:.3}",
                verdict.awake_count,
                verdict.overtime,
                verdict.p_sleep,
                verdict.roll.unwrap_or_default()
            );
        }
        if verdict.sleep {
            tracing::info!(
                "falling asleep after {} heartbeats (cycle {})",
                verdict.awake_count,
                state.cycles
            );
            return Ok(());
        }

        let mut wait = match Duration::try_from_secs_f64(state.cooldown_secs) {
            Ok(wait) => wait,
            Err(e) => {
                tracing::error!("cooldown {}s unusable ({e}); pausing instead", state.cooldown_secs);
                self.settings.failure_pause
            }
        };
        if !delivered {
            wait += self.settings.failure_pause;
        }
        self.cooldown(state, wait).await
    }

    /// Send one heartbeat with the configured retries. `Ok(false)` means
    /// every attempt failed.
    async fn heartbeat(&mut self, message: &str) -> Result<bool, Cancelled> {
        let attempts = self.settings.heartbeat_retry.attempts();
        let mut schedule = self.settings.heartbeat_retry.backoff.schedule();
        for attempt in 1..=attempts {
            match self.kernel.run_heartbeat(message).await {
                Ok(reply) => {
                    tracing::debug!("heartbeat reply: {}", preview(&reply, 200));
                    return Ok(true);
                }
                Err(e) if attempt < attempts => {
                    let delay = schedule.next_delay();
                    tracing::warn!("heartbeat attempt {attempt}/{attempts} failed: {e:#}; retrying in {delay:?}");
                    pause(delay, &self.cancel).await?;
                }
                Err(e) => {
                    tracing::warn!(
                        "heartbeat failed: {e:#}; pausing {:?} after cooldown",
                        self.settings.failure_pause
                    );
                    self.note_error(format!("heartbeat failed: {e:#}"));
                }
            }
        }
        Ok(false)
    }

    /// Wait out the cooldown. Sleep and digest commands end it early.
    async fn cooldown(&mut self, state: &mut DaemonState, wait: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + wait;
        let secs = wait.as_secs_f64();
        self.status
            .send_modify(|s| s.activity = Activity::Cooldown { secs });
        tracing::debug!("cooling down for {secs:.1}s");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::Sleep) => return self.force_sleep(state, None).await,
                    Some(Command::Digest { replay_ratio }) => {
                        return self.force_sleep(state, Some(replay_ratio)).await;
                    }
                    Some(Command::Wake) => tracing::info!("wake requested while awake; ignoring"),
                    None => self.commands_open = false,
                },
            }
        }
    }

    /// First sleep or digest command waiting in the queue, if any.
    fn queued_sleep_request(&mut self) -> Option<Option<f64>> {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Sleep => return Some(None),
                Command::Digest { replay_ratio } => return Some(Some(replay_ratio)),
                Command::Wake => tracing::info!("wake requested while awake; ignoring"),
            }
        }
        None
    }

    async fn force_sleep(&mut self, state: &mut DaemonState, replay_ratio: Option<f64>) -> Result<(), Cancelled> {
        match state.fall_asleep(replay_ratio, &mut self.rng) {
            Ok(next) => {
                tracing::info!(
                    "operator sleep at heartbeat {} (cycle {})",
                    state.awake_count,
                    state.cycles
                );
                self.commit(state, next).await
            }
            Err(e) => {
                tracing::error!("forced sleep rejected: {e}");
                self.note_error(e.to_string());
                Ok(())
            }
        }
    }

    async fn sleep_phase(&mut self, state: &mut DaemonState) -> Result<(), Cancelled> {
        let replay_ratio = state.sleep_replay_ratio(&mut self.rng);
        tracing::info!(
            "sleeping: digesting cycle {} with replay_ratio={replay_ratio:.2}",
            state.cycles
        );

        let status = &self.status;
        let commands = &mut self.commands;
        let report = DigestExecutor {
            store: &self.store,
            summarizer: &mut self.kernel,
            logs: &self.logs,
            settings: &self.settings.digest,
            cancel: &self.cancel,
        }
        .run(replay_ratio, &mut self.rng, |progress| {
            status.send_modify(|s| s.activity = Activity::Digesting(progress.clone()));
            let mut interrupt = None;
            while let Ok(command) = commands.try_recv() {
                match command {
                    Command::Wake => interrupt = Some(Interrupt::Wake),
                    Command::Sleep | Command::Digest { .. } => {
                        tracing::info!("{command:?} requested while sleeping; ignoring")
                    }
                }
            }
            interrupt
        })
        .await?;

        self.status
            .send_modify(|s| s.last_digest = Some(report.outcome.clone()));
        if report.interrupted == Some(Interrupt::Shutdown) {
            return Err(Cancelled);
        }

        match state.wake(&self.settings.growth, &mut self.rng) {
            Ok(next) => {
                self.commit(state, next).await?;
                tracing::info!(
                    "awake: cycle {}, maturity {:.3}, min_awake {}, capacity {:.2}, cooldown {:.1}s",
                    state.cycles,
                    state.maturity,
                    state.min_awake,
                    state.capacity,
                    state.cooldown_secs
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("wake rejected: {e}; staying asleep");
                self.note_error(e.to_string());
                pause(self.settings.failure_pause, &self.cancel).await
            }
        }
    }

    /// Persist `next`, then adopt it. Nothing moves on until the write lands.
    async fn commit(&mut self, state: &mut DaemonState, next: DaemonState) -> Result<(), Cancelled> {
        persist("save daemon state", self.settings.persistence(), &self.cancel, || {
            self.store.save_state(&next)
        })
        .await?;
        self.publish_state(&next);
        *state = next;
        Ok(())
    }

    fn publish_state(&self, state: &DaemonState) {
        self.status.send_modify(|s| s.state = Some(state.clone()));
    }

    fn note_error(&self, message: String) {
        self.status.send_modify(|s| s.last_error = Some(message));
    }
}

#[cfg(test)]
impl<S, K, L, V> Daemon<S, K, L, V> {
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
