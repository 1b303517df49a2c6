//! The coordinating control loop.
//!
//! A single `select!` loop drives every job: it wakes on run-completion
//! events from supervisors, on a periodic tick to re-check idle jobs, and on
//! the shutdown token. For each idle job it decides spawn now / wait /
//! already running; completions feed the cooldown tracker before the same
//! job is considered eligible again, so per-job ordering is strict while
//! different jobs proceed fully independently.
//!
//! On shutdown, stop is broadcast to every active supervisor at once and the
//! loop waits bounded by the largest grace period among running jobs; total
//! shutdown time is the maximum of the individual stop-to-exit latencies,
//! not the sum.

mod table;

pub use table::{JobEntry, JobState, JobTable, RUN_HISTORY_LIMIT};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cooldown::CooldownTracker;
use crate::registry::Registry;
use crate::supervisor::{Outcome, ProcessSupervisor, RunRecord, SupervisorHandle};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Scheduler {
    table: Arc<RwLock<JobTable>>,
    cooldowns: CooldownTracker,
    handles: HashMap<String, SupervisorHandle>,
    events_tx: mpsc::Sender<RunRecord>,
    events_rx: mpsc::Receiver<RunRecord>,
    shutdown: CancellationToken,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Registry,
        cooldowns: CooldownTracker,
        shutdown: CancellationToken,
        tick: Duration,
    ) -> Self {
        let table = Arc::new(RwLock::new(JobTable::new(&registry, &cooldowns)));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            table,
            cooldowns,
            handles: HashMap::new(),
            events_tx,
            events_rx,
            shutdown,
            tick,
        }
    }

    /// Shared view of per-job state, for the status server and tests.
    pub fn table(&self) -> Arc<RwLock<JobTable>> {
        self.table.clone()
    }

    /// Run until the shutdown token fires, then drain all active runs.
    pub async fn run(mut self) {
        {
            let table = self.table.read().await;
            tracing::info!(jobs = table.entries().len(), "Scheduler started");
        }

        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                Some(record) = self.events_rx.recv() => {
                    self.on_run_finished(record).await;
                }
                _ = tick.tick() => {
                    self.dispatch_due().await;
                }
            }
        }

        self.shutdown_all().await;
    }

    async fn dispatch_due(&mut self) {
        let due = self.table.write().await.take_due(Utc::now());
        for spec in due {
            match ProcessSupervisor::start(spec.clone(), self.events_tx.clone()) {
                Ok(handle) => {
                    let record = handle.poll();
                    self.table.write().await.mark_running(&spec.id, record);
                    self.handles.insert(spec.id.clone(), handle);
                }
                Err(e) => {
                    // A missing executable is a per-job failure: mark the
                    // attempt crashed and let the restart policy and
                    // cooldown govern the retry.
                    tracing::error!(job_id = %spec.id, error = %e, "Spawn failed");
                    let mut record = RunRecord::new(&spec.id, None);
                    record.finish(Outcome::Crashed, None);
                    self.on_run_finished(record).await;
                }
            }
        }
    }

    async fn on_run_finished(&mut self, record: RunRecord) {
        if let Some(handle) = self.handles.remove(&record.job_id) {
            // The supervise task has already published its terminal record;
            // this only reaps the task itself.
            handle.join().await;
        }
        self.finish_bookkeeping(record).await;
    }

    /// Ordering invariant: the completion is recorded in the cooldown
    /// tracker before the job table can mark the job eligible again.
    async fn finish_bookkeeping(&mut self, record: RunRecord) {
        let finished_at = record.finished_at.unwrap_or_else(Utc::now);
        if let Err(e) = self.cooldowns.record_completion(&record.job_id, finished_at) {
            tracing::error!(job_id = %record.job_id, error = %e, "Failed to persist cooldown state");
        }

        let mut table = self.table.write().await;
        let cooldown = table
            .get(&record.job_id)
            .map(|entry| entry.spec.cooldown)
            .unwrap_or_default();
        let next_eligible = self.cooldowns.next_eligible(&record.job_id, cooldown);
        let job_id = record.job_id.clone();
        table.mark_finished(record, next_eligible);

        if let Some(entry) = table.get(&job_id) {
            tracing::info!(
                job_id = %job_id,
                state = %entry.state,
                next_eligible = ?entry.next_eligible,
                "Job rescheduled"
            );
        }
    }

    /// Broadcast stop to every active supervisor at once, then wait bounded
    /// by the largest grace period among them. Supervisors escalate to
    /// SIGKILL on their own, so the wait cannot hang indefinitely.
    async fn shutdown_all(&mut self) {
        if self.handles.is_empty() {
            self.table.write().await.park_all();
            tracing::info!("Shutdown complete, no active runs");
            return;
        }

        let max_grace = {
            let table = self.table.read().await;
            table
                .running()
                .map(|e| e.spec.grace_period)
                .max()
                .unwrap_or_default()
        };

        for handle in self.handles.values() {
            handle.request_stop();
        }
        tracing::info!(
            active = self.handles.len(),
            max_grace_secs = max_grace.as_secs(),
            "Stop requested for all active runs"
        );

        let handles: Vec<SupervisorHandle> = self.handles.drain().map(|(_, h)| h).collect();
        let bound = max_grace + Duration::from_secs(2);
        let drained = tokio::time::timeout(bound, async {
            let mut records = Vec::with_capacity(handles.len());
            for handle in handles {
                records.push(handle.join().await);
            }
            records
        })
        .await;

        match drained {
            Ok(records) => {
                for record in records {
                    self.finish_bookkeeping(record).await;
                }
            }
            Err(_) => {
                tracing::error!(
                    bound_secs = bound.as_secs(),
                    "Active runs did not drain within the shutdown bound"
                );
            }
        }

        self.table.write().await.park_all();
        tracing::info!("Shutdown complete");
    }
}
