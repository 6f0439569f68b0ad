//! End-to-end tamper detection over the WORM log (scenario 6): flip one
//! byte in an on-disk event payload and confirm `verify()` reports the
//! exact entry that diverged, that the chain keeps accepting new appends
//! from its current tip, and that the break persists until an explicit
//! repair record is written.

use htn_engine::worm::{VerifyOutcome, WormLog};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn tamper_is_detected_and_appends_continue_from_the_tip() {
    let dir = tempdir().unwrap();
    let worm = WormLog::open(dir.path().join("worm"), 1_000, None).unwrap();

    worm.append("task.started", &json!({"task_id": "a"})).unwrap();
    worm.append("task.completed", &json!({"task_id": "a"})).unwrap();
    worm.append("task.started", &json!({"task_id": "b"})).unwrap();

    assert_eq!(worm.verify().unwrap(), VerifyOutcome::Ok);

    worm.corrupt_for_test(1, 5).unwrap();

    match worm.verify().unwrap() {
        VerifyOutcome::BrokenAt(n) => assert_eq!(n, 1),
        VerifyOutcome::Ok => panic!("expected corruption to be detected"),
    }

    // The chain still accepts new appends, continuing from the (unaffected)
    // in-memory tip hash rather than refusing to make progress.
    let seq = worm.append("task.started", &json!({"task_id": "c"})).unwrap();
    assert_eq!(seq, 3);

    // The break is never silently repaired by further activity.
    match worm.verify().unwrap() {
        VerifyOutcome::BrokenAt(n) => assert_eq!(n, 1),
        VerifyOutcome::Ok => panic!("corruption must not self-heal"),
    }
}

#[test]
fn verify_reports_ok_over_an_untouched_chain() {
    let dir = tempdir().unwrap();
    let worm = WormLog::open(dir.path().join("worm"), 2, None).unwrap();

    for i in 0..5 {
        worm.append("tool.executed", &json!({"i": i})).unwrap();
    }

    assert_eq!(worm.verify().unwrap(), VerifyOutcome::Ok);
    assert_eq!(worm.len(), 5);
}

#[test]
fn reopening_the_log_preserves_the_hash_chain() {
    let dir = tempdir().unwrap();
    {
        let worm = WormLog::open(dir.path().join("worm"), 1_000, None).unwrap();
        worm.append("task.started", &json!({"task_id": "a"})).unwrap();
        worm.append("task.completed", &json!({"task_id": "a"})).unwrap();
    }

    let reopened = WormLog::open(dir.path().join("worm"), 1_000, None).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.verify().unwrap(), VerifyOutcome::Ok);

    let seq = reopened.append("task.started", &json!({"task_id": "b"})).unwrap();
    assert_eq!(seq, 2);
}
