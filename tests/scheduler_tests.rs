//! End-to-end scheduler tests driving real worker processes on a fast tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use harvestd::config::ManifestConfig;
use harvestd::cooldown::CooldownTracker;
use harvestd::registry::Registry;
use harvestd::scheduler::{JobState, JobTable, Scheduler};
use harvestd::supervisor::Outcome;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct Harness {
    table: Arc<RwLock<JobTable>>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn start_scheduler(manifest_toml: &str) -> Harness {
    let manifest: ManifestConfig = toml::from_str(manifest_toml).unwrap();
    let registry = Registry::load(&manifest).unwrap();
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        registry,
        CooldownTracker::in_memory(),
        shutdown.clone(),
        Duration::from_millis(20),
    );
    let table = scheduler.table();
    let task = tokio::spawn(scheduler.run());
    Harness {
        table,
        shutdown,
        task,
    }
}

impl Harness {
    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

#[tokio::test]
async fn test_restart_never_runs_exactly_once() {
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "once"
        command = ["/bin/sh", "-c", "exit 0"]
        timeout_secs = 10
        cooldown_secs = 0
        grace_period_secs = 1
        restart = "never"
        "#,
    );

    tokio::time::sleep(Duration::from_millis(500)).await;

    {
        let table = harness.table.read().await;
        let entry = table.get("once").unwrap();
        assert_eq!(entry.runs(), 1, "never-restart job must run exactly once");
        assert_eq!(entry.state, JobState::Stopped);
        assert_eq!(entry.last_outcome(), Some(Outcome::Completed));
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_cooldown_blocks_immediate_restart() {
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "spaced"
        command = ["/bin/sh", "-c", "exit 0"]
        timeout_secs = 10
        cooldown_secs = 3600
        grace_period_secs = 1
        restart = "always"
        "#,
    );

    tokio::time::sleep(Duration::from_millis(500)).await;

    {
        let table = harness.table.read().await;
        let entry = table.get("spaced").unwrap();
        assert_eq!(entry.runs(), 1, "cooldown must block the second run");
        assert_eq!(entry.state, JobState::Idle);
        let next = entry.next_eligible.unwrap();
        let last_end = entry.history.back().unwrap().finished_at.unwrap();
        assert_eq!(next, last_end + chrono::Duration::seconds(3600));
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_zero_cooldown_recycles_without_overlap() {
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "churner"
        command = ["/bin/sh", "-c", "exit 0"]
        timeout_secs = 10
        cooldown_secs = 0
        grace_period_secs = 1
        restart = "always"
        "#,
    );

    tokio::time::sleep(Duration::from_millis(600)).await;

    {
        let table = harness.table.read().await;
        let entry = table.get("churner").unwrap();
        assert!(entry.runs() >= 2, "expected recycling, got {} runs", entry.runs());

        // Runs never overlap: each starts only after the previous ended
        let records: Vec<_> = entry.history.iter().collect();
        for pair in records.windows(2) {
            assert!(pair[1].started_at >= pair[0].finished_at.unwrap());
        }
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_spawn_failure_marks_crashed_and_respects_policy() {
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "ghost"
        command = ["/definitely/not/a/real/binary"]
        timeout_secs = 10
        cooldown_secs = 0
        grace_period_secs = 1
        restart = "never"
        "#,
    );

    tokio::time::sleep(Duration::from_millis(400)).await;

    {
        let table = harness.table.read().await;
        let entry = table.get("ghost").unwrap();
        assert_eq!(entry.runs(), 1);
        assert_eq!(entry.last_outcome(), Some(Outcome::Crashed));
        assert_eq!(entry.state, JobState::Stopped);
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_jobs_run_independently() {
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "healthy"
        command = ["/bin/sh", "-c", "exit 0"]
        timeout_secs = 10
        cooldown_secs = 3600
        grace_period_secs = 1

        [[job]]
        id = "broken"
        command = ["/definitely/not/a/real/binary"]
        timeout_secs = 10
        cooldown_secs = 3600
        grace_period_secs = 1
        "#,
    );

    tokio::time::sleep(Duration::from_millis(500)).await;

    {
        let table = harness.table.read().await;
        // A failing job never affects its neighbors
        assert_eq!(
            table.get("healthy").unwrap().last_outcome(),
            Some(Outcome::Completed)
        );
        assert_eq!(
            table.get("broken").unwrap().last_outcome(),
            Some(Outcome::Crashed)
        );
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_all_jobs_concurrently() {
    // Three workers that ignore the polite signal: each takes a full grace
    // period to die. Concurrent shutdown finishes in ~one grace period;
    // sequential would take three.
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "a"
        command = ["/bin/sh", "-c", "trap '' INT TERM; sleep 10"]
        timeout_secs = 60
        cooldown_secs = 0
        grace_period_secs = 1

        [[job]]
        id = "b"
        command = ["/bin/sh", "-c", "trap '' INT TERM; sleep 10"]
        timeout_secs = 60
        cooldown_secs = 0
        grace_period_secs = 1

        [[job]]
        id = "c"
        command = ["/bin/sh", "-c", "trap '' INT TERM; sleep 10"]
        timeout_secs = 60
        cooldown_secs = 0
        grace_period_secs = 1
        "#,
    );

    // Let all three spawn
    tokio::time::sleep(Duration::from_millis(300)).await;
    {
        let table = harness.table.read().await;
        assert_eq!(table.running().count(), 3);
    }

    let stop_started = Instant::now();
    harness.shutdown.cancel();
    let _ = harness.task.await;
    let elapsed = stop_started.elapsed();

    assert!(
        elapsed < Duration::from_millis(2500),
        "shutdown took {elapsed:?}, expected ~max grace period, not the sum"
    );

    let table = harness.table.read().await;
    for id in ["a", "b", "c"] {
        let entry = table.get(id).unwrap();
        assert_eq!(entry.state, JobState::Stopped);
        assert_eq!(entry.last_outcome(), Some(Outcome::Killed));
    }
}

#[tokio::test]
async fn test_shutdown_with_idle_jobs_is_immediate() {
    let harness = start_scheduler(
        r#"
        [[job]]
        id = "spaced"
        command = ["/bin/sh", "-c", "exit 0"]
        timeout_secs = 10
        cooldown_secs = 3600
        grace_period_secs = 30
        "#,
    );

    tokio::time::sleep(Duration::from_millis(300)).await;

    let stop_started = Instant::now();
    harness.stop().await;
    assert!(stop_started.elapsed() < Duration::from_secs(1));
}
