use std::time::Duration;

use chrono::Utc;
use harvestd::cooldown::CooldownTracker;

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let end = Utc::now();
    {
        let mut tracker = CooldownTracker::with_state_file(path.clone()).unwrap();
        assert!(tracker.last_end("bgg").is_none());
        tracker.record_completion("bgg", end).unwrap();
        tracker
            .record_completion("bga", end + chrono::Duration::seconds(5))
            .unwrap();
    }

    // A fresh tracker over the same file sees the previous completions, so
    // cooldowns are honored across supervisor restarts.
    let tracker = CooldownTracker::with_state_file(path).unwrap();
    assert_eq!(tracker.last_end("bgg"), Some(end));
    assert_eq!(
        tracker.next_eligible("bgg", Duration::from_secs(3600)),
        Some(end + chrono::Duration::seconds(3600))
    );
    assert_eq!(
        tracker.last_end("bga"),
        Some(end + chrono::Duration::seconds(5))
    );
    assert!(tracker.last_end("luding").is_none());
}

#[test]
fn test_missing_state_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = CooldownTracker::with_state_file(dir.path().join("nope.json")).unwrap();
    assert!(tracker.next_eligible("bgg", Duration::from_secs(60)).is_none());
}

#[test]
fn test_corrupt_state_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "not json at all {").unwrap();

    assert!(CooldownTracker::with_state_file(path).is_err());
}

#[test]
fn test_in_memory_tracker_does_not_write() {
    let mut tracker = CooldownTracker::in_memory();
    tracker.record_completion("bgg", Utc::now()).unwrap();
    assert!(tracker.last_end("bgg").is_some());
}
