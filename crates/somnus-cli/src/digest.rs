//! Digest executor: runs one planned digest chunk by chunk.
//!
//! Learnings are written after every chunk so a crash loses at most the chunk
//! in flight. Cursors only move once every planned chunk succeeded, and they
//! move to the log lengths seen when the digest started, never further.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use somnus_core::{
    ChunkSizes, ChunkText, DigestOutcome, DigestPlan, DigestStatus, EMPTY_LEARNINGS, LogKind,
    UnixTime, Variate, plan_digest,
};
use somnus_store::{LogSource, StateStore, StateStoreExt};

use crate::kernel::{DigestSummarizer, preview};
use crate::retry::{BackoffConfig, Cancelled, RetryPolicy, pause, persist};

#[derive(Debug, Clone, Default)]
pub struct DigestSettings {
    pub sizes: ChunkSizes,
    pub retry: RetryPolicy,
    pub persistence: BackoffConfig,
    pub learnings_path: Option<PathBuf>,
}

/// Why a digest stopped at a chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Wake,
    Shutdown,
}

impl Interrupt {
    pub fn reason(&self) -> &'static str {
        match self {
            Interrupt::Wake => "wake requested",
            Interrupt::Shutdown => "shutdown",
        }
    }
}

/// Live progress, published through the status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestProgress {
    pub replay_ratio: f64,
    pub new_chunks: usize,
    pub replay_chunks: usize,
    pub processed: usize,
    /// Label of the chunk about to be summarized.
    pub current: Option<&'static str>,
}

impl DigestProgress {
    fn of(plan: &DigestPlan) -> Self {
        Self {
            replay_ratio: plan.replay_ratio,
            new_chunks: plan.new_count(),
            replay_chunks: plan.replay_selected(),
            processed: 0,
            current: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DigestReport {
    pub outcome: DigestOutcome,
    pub interrupted: Option<Interrupt>,
}

/// Borrowed collaborators for a single digest.
pub struct DigestExecutor<'a, S, Z, L> {
    pub store: &'a S,
    pub summarizer: &'a mut Z,
    pub logs: &'a L,
    pub settings: &'a DigestSettings,
    pub cancel: &'a CancellationToken,
}

impl<S, Z, L> DigestExecutor<'_, S, Z, L>
where
    S: StateStore,
    Z: DigestSummarizer,
    L: LogSource,
{
    /// Plan and run a digest. `boundary` is consulted before every chunk and
    /// may stop the digest there.
    ///
    /// Returns `Err(Cancelled)` only when shutdown arrived while a store write
    /// was being retried; the run is then left unrecorded.
    pub async fn run(
        mut self,
        replay_ratio: f64,
        rng: &mut impl Variate,
        mut boundary: impl FnMut(&DigestProgress) -> Option<Interrupt>,
    ) -> Result<DigestReport, Cancelled> {
        let started_at = UnixTime::now();
        let settings = self.settings;
        let cancel = self.cancel;
        let backoff = &settings.persistence;

        let logs = self.logs.history().and_then(|h| Ok((h, self.logs.tool_log()?)));
        let (history, tool_log) = match logs {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!("digest aborted: could not read logs: {e}");
                let mut outcome = DigestOutcome::unplanned(replay_ratio, started_at);
                outcome.reason = Some(format!("could not read logs: {e}"));
                outcome.finished_at = UnixTime::now();
                self.record(None, &outcome).await?;
                return Ok(DigestReport {
                    outcome,
                    interrupted: None,
                });
            }
        };

        let cursors = persist("load digest cursors", backoff, cancel, || {
            self.store.load_cursors()
        })
        .await?;
        let plan = plan_digest(
            cursors,
            history.len(),
            tool_log.len(),
            settings.sizes,
            replay_ratio,
            rng,
        );
        if plan.clamped {
            tracing::warn!(
                "stored cursors {}/{} are past the logs ({}/{}); treating them as fully digested",
                cursors.history,
                cursors.tool_log,
                history.len(),
                tool_log.len()
            );
        }
        tracing::info!(
            "digest: {} new ({} history + {} tool) + {} replay of {} requested (pool {}) = {} chunks, replay_ratio={:.2}",
            plan.new_count(),
            plan.new_in(LogKind::History),
            plan.new_in(LogKind::ToolLog),
            plan.replay_selected(),
            plan.replay_target,
            plan.replay_pool,
            plan.workload(),
            replay_ratio
        );

        let mut outcome = DigestOutcome::begin(&plan, started_at);

        if plan.workload() == 0 {
            tracing::info!("digest: nothing to process");
            outcome.status = DigestStatus::NothingNew;
            outcome.finished_at = UnixTime::now();
            self.record(Some(&plan), &outcome).await?;
            return Ok(DigestReport {
                outcome,
                interrupted: None,
            });
        }

        let mut learnings = persist("load learnings", backoff, cancel, || {
            self.store.load_learnings()
        })
        .await?
        .filter(|l| !l.trim().is_empty());

        let mut progress = DigestProgress::of(&plan);
        let total = plan.workload();
        let mut interrupted = None;
        let mut failure = None;

        for (index, chunk) in plan.chunks().enumerate() {
            progress.current = Some(chunk.label());
            let stop = if cancel.is_cancelled() {
                Some(Interrupt::Shutdown)
            } else {
                boundary(&progress)
            };
            if let Some(stop) = stop {
                tracing::info!(
                    "digest stopped before chunk {}/{total}: {}",
                    index + 1,
                    stop.reason()
                );
                interrupted = Some(stop);
                break;
            }

            let source = match chunk.log {
                LogKind::History => &history,
                LogKind::ToolLog => &tool_log,
            };
            let records = source.get(chunk.offset..chunk.end()).unwrap_or(&[]);
            let text = ChunkText::render(*chunk, records);
            tracing::debug!(
                "digesting chunk {}/{total} ({}, {}..{})",
                index + 1,
                chunk.label(),
                chunk.offset,
                chunk.end()
            );

            let current = learnings.as_deref().unwrap_or(EMPTY_LEARNINGS);
            let updated = match self.summarize_with_retry(current, &text).await {
                Ok(updated) => updated,
                Err(ChunkFailure::Exhausted(e)) => {
                    failure = Some(format!("chunk {}/{total} ({}) failed: {e}", index + 1, chunk.label()));
                    break;
                }
                Err(ChunkFailure::Cancelled) => {
                    interrupted = Some(Interrupt::Shutdown);
                    break;
                }
            };

            let updated = updated.trim();
            if updated.is_empty() {
                tracing::debug!("chunk {}/{total}: summarizer returned nothing, keeping learnings", index + 1);
            } else {
                persist("save learnings", backoff, cancel, || {
                    self.store.save_learnings(updated)
                })
                .await?;
                export_learnings(settings.learnings_path.as_deref(), updated);
                learnings = Some(updated.to_string());
            }
            progress.processed += 1;
            outcome.processed = progress.processed;
        }

        outcome.learnings_len = learnings.as_deref().map_or(0, |l| l.chars().count());
        outcome.finished_at = UnixTime::now();

        let completed = outcome.processed == total;
        if completed {
            outcome.status = DigestStatus::Completed;
            tracing::info!(
                "digest complete: {}/{total} chunks, learnings {} chars",
                outcome.processed,
                outcome.learnings_len
            );
            self.record(Some(&plan), &outcome).await?;
        } else {
            let reason = failure
                .or_else(|| interrupted.map(|i| i.reason().to_string()))
                .unwrap_or_else(|| "stopped early".to_string());
            tracing::warn!(
                "digest aborted after {}/{total} chunks: {reason}; cursors unchanged",
                outcome.processed
            );
            outcome.status = DigestStatus::Aborted;
            outcome.reason = Some(reason);
            self.record(None, &outcome).await?;
        }

        Ok(DigestReport {
            outcome,
            interrupted,
        })
    }

    async fn summarize_with_retry(
        &mut self,
        learnings: &str,
        text: &ChunkText,
    ) -> Result<String, ChunkFailure> {
        let attempts = self.settings.retry.attempts();
        let mut schedule = self.settings.retry.backoff.schedule();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.summarizer.summarize(learnings, text).await {
                Ok(updated) => return Ok(updated),
                Err(e) if attempt < attempts => {
                    let delay = schedule.next_delay();
                    tracing::warn!(
                        "summarizer attempt {attempt}/{attempts} failed: {}; retrying in {delay:?}",
                        preview(&format!("{e:#}"), 300)
                    );
                    if pause(delay, self.cancel).await.is_err() {
                        return Err(ChunkFailure::Cancelled);
                    }
                }
                Err(e) => {
                    tracing::warn!("summarizer attempt {attempt}/{attempts} failed: {e:#}");
                    return Err(ChunkFailure::Exhausted(format!("{e:#}")));
                }
            }
        }
    }

    /// Persist the outcome, advancing cursors only for a finished plan.
    async fn record(&self, plan: Option<&DigestPlan>, outcome: &DigestOutcome) -> Result<(), Cancelled> {
        let cursors = plan.map(DigestPlan::next_cursors);
        persist("record digest", &self.settings.persistence, self.cancel, || {
            self.store.commit_digest(cursors, outcome)
        })
        .await
    }
}

enum ChunkFailure {
    Exhausted(String),
    Cancelled,
}

/// Best-effort mirror of the learnings for the agent to read. The store stays
/// the source of truth, so a failed write is only logged.
fn export_learnings(path: Option<&Path>, learnings: &str) {
    let Some(path) = path else { return };
    let tmp = path.with_extension("tmp");
    let result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| std::fs::write(&tmp, learnings))
        .and_then(|_| std::fs::rename(&tmp, path));
    if let Err(e) = result {
        tracing::warn!("could not write learnings to {}: {e}", path.display());
    }
}
