//! A second connection (the offline `status` command) reading while the
//! daemon's connection writes.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use somnus_core::{DigestCursors, DigestOutcome, DigestStatus, UnixTime, plan_digest};
use somnus_store::{DataDir, StateStore, StateStoreExt};

#[test]
fn reader_sees_committed_digest_as_a_whole() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = DataDir::at(tmp.path());
    let writer = dir.open_store().unwrap();
    let reader = dir.open_store().unwrap();

    let mut rng = SmallRng::seed_from_u64(42);
    let plan = plan_digest(
        DigestCursors::default(),
        30,
        60,
        Default::default(),
        0.25,
        &mut rng,
    );
    let mut outcome = DigestOutcome::begin(&plan, UnixTime(1_000));
    outcome.status = DigestStatus::Completed;
    outcome.processed = outcome.total();
    outcome.finished_at = UnixTime(1_060);

    writer
        .commit_digest(Some(plan.next_cursors()), &outcome)
        .unwrap();

    assert_eq!(
        reader.load_cursors().unwrap(),
        DigestCursors {
            history: 30,
            tool_log: 60
        }
    );
    assert_eq!(reader.last_digest().unwrap(), Some(outcome.clone()));
    assert_eq!(reader.recent_runs(1).unwrap(), vec![outcome]);
}

#[test]
fn learnings_survive_reopen_between_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = DataDir::at(tmp.path());
    {
        let store = dir.open_store().unwrap();
        store.save_learnings("- chunk 1 lesson").unwrap();
        store.save_learnings("- chunk 1 lesson\n- chunk 2 lesson").unwrap();
        // dropped without a clean shutdown path
    }
    let store = dir.open_store().unwrap();
    assert_eq!(
        store.load_learnings().unwrap().as_deref(),
        Some("- chunk 1 lesson\n- chunk 2 lesson")
    );
    assert!(store.get_blob("digest_cursors").unwrap().is_none());
}
