//! In-memory collaborators for daemon and digest tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::{Result, bail};
use serde_json::{Value, json};

use somnus_core::ChunkText;
use somnus_store::{LogSource, StateStore, Store, StoreError};

use crate::kernel::{DigestSummarizer, HeartbeatExecutor};

/// Shared, growable history and tool log.
#[derive(Clone, Default)]
pub struct MemLogs {
    history: Rc<RefCell<Vec<Value>>>,
    tool_log: Rc<RefCell<Vec<Value>>>,
    pub unreadable: bool,
}

impl MemLogs {
    pub fn with_lengths(history: usize, tool_log: usize) -> Self {
        let logs = Self::default();
        logs.append_history(history);
        logs.append_tool_log(tool_log);
        logs
    }

    pub fn append_history(&self, n: usize) {
        let mut history = self.history.borrow_mut();
        for _ in 0..n {
            let i = history.len();
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            history.push(json!({"role": role, "content": format!("message {i}")}));
        }
    }

    pub fn append_tool_log(&self, n: usize) {
        let mut log = self.tool_log.borrow_mut();
        for _ in 0..n {
            let i = log.len();
            log.push(json!({
                "type": "tool",
                "ts": "2026-03-01 12:00:00",
                "tool": "shell",
                "args": {"cmd": format!("step {i}")},
                "result": "ok",
            }));
        }
    }

    pub fn lengths(&self) -> (usize, usize) {
        (self.history.borrow().len(), self.tool_log.borrow().len())
    }
}

impl LogSource for MemLogs {
    fn history(&self) -> somnus_store::Result<Vec<Value>> {
        if self.unreadable {
            return Err(StoreError::InvalidData("history is being rewritten".into()));
        }
        Ok(self.history.borrow().clone())
    }

    fn tool_log(&self) -> somnus_store::Result<Vec<Value>> {
        Ok(self.tool_log.borrow().clone())
    }
}

/// Scripted kernel recording every call.
#[derive(Default)]
pub struct FakeKernel {
    pub heartbeats: Vec<String>,
    /// `(learnings given, chunk)` for every summarize call, failed ones included.
    pub summaries: Vec<(String, ChunkText)>,
    /// Upcoming heartbeats that fail.
    pub failing_heartbeats: usize,
    /// Chunks that succeed before every further summarize call fails.
    pub summaries_before_failure: Option<usize>,
    /// Answer with whitespace instead of new learnings.
    pub blank: bool,
    /// Records appended to these logs during the first summarize call.
    pub grow_on_summarize: Option<(MemLogs, usize, usize)>,
    pub succeeded: usize,
}

impl FakeKernel {
    pub fn labels(&self) -> Vec<&'static str> {
        self.summaries.iter().map(|(_, c)| c.label).collect()
    }
}

impl HeartbeatExecutor for FakeKernel {
    async fn run_heartbeat(&mut self, message: &str) -> Result<String> {
        self.heartbeats.push(message.to_string());
        if self.failing_heartbeats > 0 {
            self.failing_heartbeats -= 1;
            bail!("kernel returned 502");
        }
        Ok("done".into())
    }
}

impl DigestSummarizer for FakeKernel {
    async fn summarize(&mut self, learnings: &str, chunk: &ChunkText) -> Result<String> {
        self.summaries.push((learnings.to_string(), chunk.clone()));
        if let Some((logs, history, tool_log)) = self.grow_on_summarize.take() {
            logs.append_history(history);
            logs.append_tool_log(tool_log);
        }
        if self
            .summaries_before_failure
            .is_some_and(|limit| self.succeeded >= limit)
        {
            bail!("summarizer timed out");
        }
        self.succeeded += 1;
        if self.blank {
            return Ok("  \n".into());
        }
        let line = format!("- {}@{}", chunk.label, chunk.chunk.offset);
        if learnings == somnus_core::EMPTY_LEARNINGS {
            Ok(line)
        } else {
            Ok(format!("{learnings}\n{line}"))
        }
    }
}

/// Store whose next `failing_writes` writes fail.
pub struct FlakyStore {
    pub inner: Store,
    pub failing_writes: Cell<usize>,
    pub failed: Cell<usize>,
}

impl FlakyStore {
    pub fn new(failing_writes: usize) -> Self {
        Self {
            inner: Store::open_in_memory().unwrap(),
            failing_writes: Cell::new(failing_writes),
            failed: Cell::new(0),
        }
    }

    fn inject(&self) -> somnus_store::Result<()> {
        let left = self.failing_writes.get();
        if left > 0 {
            self.failing_writes.set(left - 1);
            self.failed.set(self.failed.get() + 1);
            return Err(StoreError::InvalidData("database is locked".into()));
        }
        Ok(())
    }
}

impl StateStore for FlakyStore {
    fn get_blob(&self, key: &str) -> somnus_store::Result<Option<String>> {
        self.inner.get_blob(key)
    }

    fn put_blobs(&self, entries: &[(&str, String)]) -> somnus_store::Result<()> {
        self.inject()?;
        self.inner.put_blobs(entries)
    }

    fn record_run(
        &self,
        outcome: &somnus_core::DigestOutcome,
        entries: &[(&str, String)],
    ) -> somnus_store::Result<()> {
        self.inject()?;
        self.inner.record_run(outcome, entries)
    }

    fn recent_runs(&self, limit: usize) -> somnus_store::Result<Vec<somnus_core::DigestOutcome>> {
        self.inner.recent_runs(limit)
    }
}
