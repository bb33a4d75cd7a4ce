//! Digest planning: split undigested log tails into chunks and pick a replay
//! sample from the already-digested prefixes.
//!
//! Planning only looks at lengths and cursors. Resolving a chunk to its
//! records happens in the executor.

use serde::{Deserialize, Serialize};

use crate::constants::{CEIL_EPSILON, HISTORY_CHUNK_SIZE, TOOL_LOG_CHUNK_SIZE};
use crate::sampler::Variate;

/// Which log a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    History,
    ToolLog,
}

/// Whether a chunk carries undigested records or replays digested ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    New,
    Replay,
}

/// Contiguous slice `offset..offset + len` of one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub log: LogKind,
    pub kind: ChunkKind,
    pub offset: usize,
    pub len: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Label handed to the summarizer alongside the rendered text.
    pub fn label(&self) -> &'static str {
        match (self.kind, self.log) {
            (ChunkKind::New, LogKind::History) => "conversation",
            (ChunkKind::New, LogKind::ToolLog) => "tool_activity",
            (ChunkKind::Replay, LogKind::History) => "replay_conversation",
            (ChunkKind::Replay, LogKind::ToolLog) => "replay_tool_activity",
        }
    }
}

/// How far each log has been digested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DigestCursors {
    pub history: usize,
    pub tool_log: usize,
}

impl DigestCursors {
    pub fn get(&self, log: LogKind) -> usize {
        match log {
            LogKind::History => self.history,
            LogKind::ToolLog => self.tool_log,
        }
    }

    /// Component-wise maximum. Cursors only ever move forward.
    pub fn advanced_to(&self, other: DigestCursors) -> DigestCursors {
        DigestCursors {
            history: self.history.max(other.history),
            tool_log: self.tool_log.max(other.tool_log),
        }
    }
}

/// Maximum records per chunk for each log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSizes {
    pub history: usize,
    pub tool_log: usize,
}

impl Default for ChunkSizes {
    fn default() -> Self {
        Self {
            history: HISTORY_CHUNK_SIZE,
            tool_log: TOOL_LOG_CHUNK_SIZE,
        }
    }
}

impl ChunkSizes {
    pub fn get(&self, log: LogKind) -> usize {
        match log {
            LogKind::History => self.history,
            LogKind::ToolLog => self.tool_log,
        }
    }
}

/// Cut `start..end` of `log` into chunks of at most `size` records.
pub fn chunk_range(log: LogKind, kind: ChunkKind, start: usize, end: usize, size: usize) -> Vec<Chunk> {
    let size = size.max(1);
    (start..end)
        .step_by(size)
        .map(|offset| Chunk {
            log,
            kind,
            offset,
            len: size.min(end - offset),
        })
        .collect()
}

/// `R = max(1, ceil(max(N, 1) * ratio))`. Replay always happens, even when
/// nothing new arrived.
pub fn replay_count(new_chunks: usize, replay_ratio: f64) -> usize {
    let effort = new_chunks.max(1) as f64 * replay_ratio;
    let r = (effort - CEIL_EPSILON).ceil();
    if r.is_nan() || r < 1.0 { 1 } else { r as usize }
}

/// Everything the executor needs to run one digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestPlan {
    /// Persisted cursors the plan started from.
    pub cursors: DigestCursors,
    /// Log lengths observed at digest start.
    pub observed: DigestCursors,
    pub replay_ratio: f64,
    /// NEW chunks, history first, each log in order.
    pub new_chunks: Vec<Chunk>,
    /// Replay chunks requested (`R`). Fewer are selected when the pool is small.
    pub replay_target: usize,
    /// Size of the replay pool the sample was drawn from.
    pub replay_pool: usize,
    /// REPLAY chunks in sampled order.
    pub replay_chunks: Vec<Chunk>,
    /// True when a stored cursor pointed past the end of its log. Planning
    /// then treats that log as fully digested.
    pub clamped: bool,
}

impl DigestPlan {
    pub fn new_count(&self) -> usize {
        self.new_chunks.len()
    }

    pub fn replay_selected(&self) -> usize {
        self.replay_chunks.len()
    }

    /// `W`: total chunks to summarize.
    pub fn workload(&self) -> usize {
        self.new_chunks.len() + self.replay_chunks.len()
    }

    pub fn new_in(&self, log: LogKind) -> usize {
        self.new_chunks.iter().filter(|c| c.log == log).count()
    }

    /// Processing order: every NEW chunk, then every REPLAY chunk.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.new_chunks.iter().chain(self.replay_chunks.iter())
    }

    /// Cursors to persist once every chunk succeeded: the lengths seen at
    /// the start, never behind the cursors we started from.
    pub fn next_cursors(&self) -> DigestCursors {
        self.observed.advanced_to(self.cursors)
    }
}

/// Plan a digest over logs of the given lengths.
pub fn plan_digest(
    cursors: DigestCursors,
    history_len: usize,
    tool_log_len: usize,
    sizes: ChunkSizes,
    replay_ratio: f64,
    v: &mut impl Variate,
) -> DigestPlan {
    let observed = DigestCursors {
        history: history_len,
        tool_log: tool_log_len,
    };
    let clamped = cursors.history > history_len || cursors.tool_log > tool_log_len;
    let h = cursors.history.min(history_len);
    let t = cursors.tool_log.min(tool_log_len);

    let mut new_chunks = chunk_range(LogKind::History, ChunkKind::New, h, history_len, sizes.history);
    new_chunks.extend(chunk_range(
        LogKind::ToolLog,
        ChunkKind::New,
        t,
        tool_log_len,
        sizes.tool_log,
    ));

    let mut pool = chunk_range(LogKind::History, ChunkKind::Replay, 0, h, sizes.history);
    pool.extend(chunk_range(LogKind::ToolLog, ChunkKind::Replay, 0, t, sizes.tool_log));

    let replay_target = replay_count(new_chunks.len(), replay_ratio);
    let replay_chunks: Vec<Chunk> = v
        .sample_indices(pool.len(), replay_target)
        .into_iter()
        .map(|i| pool[i])
        .collect();

    DigestPlan {
        cursors,
        observed,
        replay_ratio,
        new_chunks,
        replay_target,
        replay_pool: pool.len(),
        replay_chunks,
        clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ScriptedVariate;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    #[test]
    fn test_chunk_range_partial_tail() {
        let chunks = chunk_range(LogKind::History, ChunkKind::New, 0, 25, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].offset, chunks[0].len), (0, 10));
        assert_eq!((chunks[2].offset, chunks[2].len), (20, 5));
        assert_eq!(chunks[2].end(), 25);
    }

    #[test]
    fn test_chunk_range_offset_start() {
        let chunks = chunk_range(LogKind::ToolLog, ChunkKind::New, 15, 60, 20);
        let spans: Vec<_> = chunks.iter().map(|c| (c.offset, c.len)).collect();
        assert_eq!(spans, vec![(15, 20), (35, 20), (55, 5)]);
    }

    #[test]
    fn test_chunk_range_empty() {
        assert!(chunk_range(LogKind::History, ChunkKind::New, 7, 7, 10).is_empty());
    }

    #[test]
    fn test_replay_count() {
        assert_eq!(replay_count(0, 0.05), 1);
        assert_eq!(replay_count(0, 0.6), 1);
        assert_eq!(replay_count(6, 0.5), 3);
        assert_eq!(replay_count(7, 0.5), 4);
        assert_eq!(replay_count(10, 0.3), 3, "float noise must not add a replay");
        assert_eq!(replay_count(100, 0.05), 5);
        assert_eq!(replay_count(3, 0.0), 1);
    }

    #[test]
    fn test_worked_example() {
        // 25 new history, 45 new tool entries, plenty of digested prefix
        let cursors = DigestCursors {
            history: 40,
            tool_log: 80,
        };
        let plan = plan_digest(cursors, 65, 125, ChunkSizes::default(), 0.5, &mut rng());
        assert_eq!(plan.new_in(LogKind::History), 3);
        assert_eq!(plan.new_in(LogKind::ToolLog), 3);
        assert_eq!(plan.new_count(), 6);
        assert_eq!(plan.replay_target, 3);
        assert_eq!(plan.replay_selected(), 3);
        assert_eq!(plan.workload(), 9);
        assert_eq!(plan.replay_pool, 4 + 4);
    }

    #[test]
    fn test_new_before_replay_in_log_order() {
        let cursors = DigestCursors {
            history: 20,
            tool_log: 40,
        };
        let plan = plan_digest(cursors, 45, 85, ChunkSizes::default(), 0.6, &mut rng());
        let order: Vec<_> = plan.chunks().map(|c| (c.kind, c.log, c.offset)).collect();
        let first_replay = order
            .iter()
            .position(|(k, _, _)| *k == ChunkKind::Replay)
            .unwrap();
        assert!(order[..first_replay].iter().all(|(k, _, _)| *k == ChunkKind::New));
        assert!(order[first_replay..].iter().all(|(k, _, _)| *k == ChunkKind::Replay));
        assert_eq!(
            &order[..first_replay],
            &[
                (ChunkKind::New, LogKind::History, 20),
                (ChunkKind::New, LogKind::History, 30),
                (ChunkKind::New, LogKind::History, 40),
                (ChunkKind::New, LogKind::ToolLog, 40),
                (ChunkKind::New, LogKind::ToolLog, 60),
                (ChunkKind::New, LogKind::ToolLog, 80),
            ]
        );
    }

    #[test]
    fn test_replay_drawn_only_from_digested_prefix() {
        let cursors = DigestCursors {
            history: 30,
            tool_log: 20,
        };
        for seed in 0..50 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let plan = plan_digest(cursors, 100, 100, ChunkSizes::default(), 0.6, &mut rng);
            for c in &plan.replay_chunks {
                assert!(c.end() <= cursors.get(c.log), "replay past cursor: {c:?}");
            }
            let mut uniq = plan.replay_chunks.clone();
            uniq.sort_by_key(|c| (c.log == LogKind::ToolLog, c.offset));
            uniq.dedup();
            assert_eq!(uniq.len(), plan.replay_chunks.len(), "sampled with replacement");
        }
    }

    #[test]
    fn test_no_new_data_still_replays() {
        let cursors = DigestCursors {
            history: 30,
            tool_log: 40,
        };
        let plan = plan_digest(cursors, 30, 40, ChunkSizes::default(), 0.05, &mut rng());
        assert_eq!(plan.new_count(), 0);
        assert_eq!(plan.replay_target, 1);
        assert_eq!(plan.replay_selected(), 1);
        assert_eq!(plan.workload(), 1);
        assert_eq!(plan.next_cursors(), cursors);
    }

    #[test]
    fn test_empty_logs_plan_nothing() {
        let plan = plan_digest(DigestCursors::default(), 0, 0, ChunkSizes::default(), 0.3, &mut rng());
        assert_eq!(plan.replay_target, 1);
        assert_eq!(plan.replay_pool, 0);
        assert_eq!(plan.workload(), 0);
    }

    #[test]
    fn test_small_pool_caps_selection() {
        let cursors = DigestCursors {
            history: 5,
            tool_log: 0,
        };
        let plan = plan_digest(cursors, 105, 0, ChunkSizes::default(), 0.6, &mut rng());
        assert_eq!(plan.new_count(), 10);
        assert_eq!(plan.replay_target, 6);
        assert_eq!(plan.replay_pool, 1);
        assert_eq!(plan.replay_selected(), 1);
        assert_eq!(plan.workload(), 11);
    }

    #[test]
    fn test_next_cursors_are_start_lengths() {
        let plan = plan_digest(DigestCursors::default(), 12, 3, ChunkSizes::default(), 0.2, &mut rng());
        assert_eq!(
            plan.next_cursors(),
            DigestCursors {
                history: 12,
                tool_log: 3
            }
        );
    }

    #[test]
    fn test_cursor_past_end_is_clamped_and_never_regresses() {
        let cursors = DigestCursors {
            history: 50,
            tool_log: 10,
        };
        let plan = plan_digest(cursors, 30, 10, ChunkSizes::default(), 0.2, &mut rng());
        assert!(plan.clamped);
        assert_eq!(plan.new_count(), 0);
        assert_eq!(plan.replay_pool, 3 + 1);
        assert_eq!(plan.next_cursors().history, 50);
        assert_eq!(plan.next_cursors().tool_log, 10);
    }

    #[test]
    fn test_scripted_replay_order() {
        let cursors = DigestCursors {
            history: 30,
            tool_log: 0,
        };
        let mut v = ScriptedVariate::new(vec![0.0]);
        let plan = plan_digest(cursors, 30, 0, ChunkSizes::default(), 0.5, &mut v);
        assert_eq!(plan.replay_chunks.len(), 1);
        assert_eq!(plan.replay_chunks[0].offset, 0);
        assert_eq!(plan.replay_chunks[0].label(), "replay_conversation");
    }
}
