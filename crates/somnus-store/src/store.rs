use std::path::Path;

use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use somnus_core::{DaemonState, DigestCursors, DigestOutcome, DigestStatus, UnixTime};

use crate::error::{Result, StoreError};
use crate::schema;

pub const KEY_STATE: &str = "daemon_state";
pub const KEY_CURSORS: &str = "digest_cursors";
pub const KEY_LEARNINGS: &str = "learnings";
pub const KEY_LAST_DIGEST: &str = "last_digest";

/// Key→blob persistence the daemon writes through.
///
/// Every write replaces whole values inside one transaction, so a reader
/// never observes a half-applied update.
pub trait StateStore {
    fn get_blob(&self, key: &str) -> Result<Option<String>>;

    /// Replace all `entries` atomically.
    fn put_blobs(&self, entries: &[(&str, String)]) -> Result<()>;

    fn put_blob(&self, key: &str, value: String) -> Result<()> {
        self.put_blobs(&[(key, value)])
    }

    /// Append a digest run and replace `entries` in the same transaction.
    fn record_run(&self, outcome: &DigestOutcome, entries: &[(&str, String)]) -> Result<()>;

    /// Most recent runs first.
    fn recent_runs(&self, limit: usize) -> Result<Vec<DigestOutcome>>;
}

fn decode<T: DeserializeOwned>(blob: Option<String>) -> Result<Option<T>> {
    blob.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(StoreError::from)
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(StoreError::from)
}

/// Typed accessors for the daemon's blobs.
pub trait StateStoreExt: StateStore {
    fn load_state(&self) -> Result<Option<DaemonState>> {
        decode(self.get_blob(KEY_STATE)?)
    }

    fn save_state(&self, state: &DaemonState) -> Result<()> {
        self.put_blob(KEY_STATE, encode(state)?)
    }

    /// Cursors default to the start of both logs.
    fn load_cursors(&self) -> Result<DigestCursors> {
        Ok(decode(self.get_blob(KEY_CURSORS)?)?.unwrap_or_default())
    }

    fn load_learnings(&self) -> Result<Option<String>> {
        decode(self.get_blob(KEY_LEARNINGS)?)
    }

    fn save_learnings(&self, learnings: &str) -> Result<()> {
        self.put_blob(KEY_LEARNINGS, encode(&learnings)?)
    }

    fn last_digest(&self) -> Result<Option<DigestOutcome>> {
        decode(self.get_blob(KEY_LAST_DIGEST)?)
    }

    /// Record a finished digest. When `cursors` is given they advance in
    /// the same transaction as the run row; an aborted digest passes `None`.
    fn commit_digest(&self, cursors: Option<DigestCursors>, outcome: &DigestOutcome) -> Result<()> {
        let mut entries = vec![(KEY_LAST_DIGEST, encode(outcome)?)];
        if let Some(cursors) = cursors {
            entries.push((KEY_CURSORS, encode(&cursors)?));
        }
        self.record_run(outcome, &entries)
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Fold the WAL into the main database file and truncate it.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        let (busy, _log, _done): (i64, i64, i64) =
            self.conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
        if busy != 0 {
            return Err(StoreError::InvalidData(
                "WAL checkpoint blocked by a concurrent reader".into(),
            ));
        }
        Ok(())
    }

    fn put_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.checkpoint_truncate() {
            tracing::debug!("WAL checkpoint on close skipped: {e}");
        }
    }
}

impl StateStore for Store {
    fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put_blobs(&self, entries: &[(&str, String)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in entries {
            Self::put_on(&tx, key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn record_run(&self, outcome: &DigestOutcome, entries: &[(&str, String)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO digest_runs
                (id, started_at, finished_at, status, reason, replay_ratio,
                 new_chunks, replay_chunks, processed, learnings_len)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                outcome.id.to_string(),
                outcome.started_at.0 as i64,
                outcome.finished_at.0 as i64,
                outcome.status.to_string(),
                outcome.reason,
                outcome.replay_ratio,
                outcome.new_chunks as i64,
                outcome.replay_chunks as i64,
                outcome.processed as i64,
                outcome.learnings_len as i64,
            ],
        )?;
        for (key, value) in entries {
            Self::put_on(&tx, key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<DigestOutcome>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, status, reason, replay_ratio,
                    new_chunks, replay_chunks, processed, learnings_len
             FROM digest_runs ORDER BY finished_at DESC, rowid DESC LIMIT ?1",
        )?;

        type Row = (String, i64, i64, String, Option<String>, f64, i64, i64, i64, i64);
        let rows: Vec<Row> = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(
                |(id, started, finished, status, reason, ratio, new, replay, processed, len)| {
                    Ok(DigestOutcome {
                        id: parse_uuid(&id)?,
                        started_at: UnixTime(started.max(0) as u64),
                        finished_at: UnixTime(finished.max(0) as u64),
                        status: parse_status(&status)?,
                        reason,
                        replay_ratio: ratio,
                        new_chunks: new.max(0) as usize,
                        replay_chunks: replay.max(0) as usize,
                        processed: processed.max(0) as usize,
                        learnings_len: len.max(0) as usize,
                    })
                },
            )
            .collect()
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("bad UUID '{s}': {e}")))
}

fn parse_status(s: &str) -> Result<DigestStatus> {
    match s {
        "completed" => Ok(DigestStatus::Completed),
        "nothing_new" => Ok(DigestStatus::NothingNew),
        "aborted" => Ok(DigestStatus::Aborted),
        other => Err(StoreError::InvalidData(format!("unknown digest status '{other}'"))),
    }
}
