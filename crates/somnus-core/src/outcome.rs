use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::DigestPlan;
use crate::time::UnixTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    /// Every planned chunk was summarized and the cursors advanced.
    Completed,
    /// Nothing new and nothing to replay.
    NothingNew,
    /// Stopped early; cursors were left where they were.
    Aborted,
}

impl std::fmt::Display for DigestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestStatus::Completed => write!(f, "completed"),
            DigestStatus::NothingNew => write!(f, "nothing_new"),
            DigestStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Record of one digest run, kept for the status query and run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestOutcome {
    pub id: Uuid,
    pub started_at: UnixTime,
    pub finished_at: UnixTime,
    pub status: DigestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub replay_ratio: f64,
    pub new_chunks: usize,
    pub replay_chunks: usize,
    pub processed: usize,
    pub learnings_len: usize,
}

impl DigestOutcome {
    /// Outcome skeleton for a plan that is about to run.
    pub fn begin(plan: &DigestPlan, started_at: UnixTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            status: DigestStatus::Aborted,
            reason: None,
            replay_ratio: plan.replay_ratio,
            new_chunks: plan.new_count(),
            replay_chunks: plan.replay_selected(),
            processed: 0,
            learnings_len: 0,
        }
    }

    /// Outcome for a digest that stopped before a plan could be made.
    pub fn unplanned(replay_ratio: f64, started_at: UnixTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            status: DigestStatus::Aborted,
            reason: None,
            replay_ratio,
            new_chunks: 0,
            replay_chunks: 0,
            processed: 0,
            learnings_len: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.new_chunks + self.replay_chunks
    }

    pub fn succeeded(&self) -> bool {
        self.status != DigestStatus::Aborted
    }
}
