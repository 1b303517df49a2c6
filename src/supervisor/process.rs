//! Lifecycle owner for one running worker process.
//!
//! A supervisor is started per run. It spawns the worker with the job's
//! command and environment, then watches two deadlines concurrently: the
//! job's timeout (hard ceiling on a healthy run) and, once a stop has been
//! requested or the timeout has fired, the grace period (ceiling on polite
//! shutdown). A worker that ignores the polite signal past the grace period
//! is killed with SIGKILL and the escalation is logged as a warning.
//!
//! Exactly one terminal [`Outcome`] is recorded per run and reported exactly
//! once over the events channel.

use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{HarvestError, Result};
use crate::registry::{JobSpec, StopSignal};
use crate::supervisor::run::{Outcome, RunRecord};

/// Why the supervisor moved from watching a healthy run into the
/// polite-stop / grace-period flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Timeout,
    Requested,
}

/// Handle held by the scheduler for one active run.
#[derive(Debug)]
pub struct SupervisorHandle {
    job_id: String,
    stop: CancellationToken,
    force: CancellationToken,
    status: watch::Receiver<RunRecord>,
    done: JoinHandle<RunRecord>,
}

impl SupervisorHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Send the configured polite stop signal to the worker. Idempotent:
    /// repeated calls after the first have no additional effect.
    pub fn request_stop(&self) {
        if !self.stop.is_cancelled() {
            self.stop.cancel();
        }
    }

    /// Non-blocking status check: the latest run snapshot.
    pub fn poll(&self) -> RunRecord {
        self.status.borrow().clone()
    }

    /// Wait until the worker reaches a terminal outcome, at most `limit`.
    /// If `limit` elapses first, escalates to an immediate forceful kill and
    /// waits for the (now prompt) terminal record.
    pub async fn await_exit(&mut self, limit: Duration) -> RunRecord {
        let waited = tokio::time::timeout(
            limit,
            self.status.wait_for(|r| r.outcome.is_terminal()),
        )
        .await
        .map(|res| res.map(|record| record.clone()));

        match waited {
            Ok(Ok(record)) => record,
            // Sender dropped: the supervise task always publishes the
            // terminal record before exiting.
            Ok(Err(_)) => self.status.borrow().clone(),
            Err(_) => {
                tracing::warn!(job_id = %self.job_id, "await_exit limit elapsed, forcing kill");
                self.force.cancel();
                let waited = self
                    .status
                    .wait_for(|r| r.outcome.is_terminal())
                    .await
                    .map(|record| record.clone());
                match waited {
                    Ok(record) => record,
                    Err(_) => self.status.borrow().clone(),
                }
            }
        }
    }

    /// Consume the handle and wait for the finalized record.
    pub async fn join(self) -> RunRecord {
        let SupervisorHandle { done, status, job_id, .. } = self;
        match done.await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Supervisor task failed");
                status.borrow().clone()
            }
        }
    }
}

pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Spawn the worker for `spec` and start supervising it.
    ///
    /// The terminal [`RunRecord`] is sent on `events` when the run ends.
    /// Fails with [`HarvestError::Spawn`] if the executable cannot be
    /// launched; no record is emitted in that case.
    pub fn start(spec: JobSpec, events: mpsc::Sender<RunRecord>) -> Result<SupervisorHandle> {
        let child = Command::new(&spec.command[0])
            .args(&spec.command[1..])
            .envs(spec.worker_env())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarvestError::Spawn {
                job_id: spec.id.clone(),
                source,
            })?;

        let record = RunRecord::new(&spec.id, child.id());
        tracing::info!(
            job_id = %spec.id,
            run_id = %record.run_id,
            pid = ?record.pid,
            command = ?spec.command,
            "Run started"
        );

        let (status_tx, status_rx) = watch::channel(record.clone());
        let stop = CancellationToken::new();
        let force = CancellationToken::new();

        let done = tokio::spawn(supervise(
            child,
            spec.clone(),
            record,
            stop.clone(),
            force.clone(),
            status_tx,
            events,
        ));

        Ok(SupervisorHandle {
            job_id: spec.id,
            stop,
            force,
            status: status_rx,
            done,
        })
    }
}

async fn supervise(
    mut child: Child,
    spec: JobSpec,
    mut record: RunRecord,
    stop: CancellationToken,
    force: CancellationToken,
    status_tx: watch::Sender<RunRecord>,
    events: mpsc::Sender<RunRecord>,
) -> RunRecord {
    let timeout_at = Instant::now() + spec.timeout;

    let cause = tokio::select! {
        res = child.wait() => {
            let (outcome, exit_code) = classify_exit(&spec.id, res);
            return finalize(record, outcome, exit_code, &status_tx, &events).await;
        }
        _ = tokio::time::sleep_until(timeout_at) => {
            tracing::warn!(
                job_id = %spec.id,
                run_id = %record.run_id,
                timeout_secs = spec.timeout.as_secs(),
                "Run exceeded its timeout, sending stop signal"
            );
            StopCause::Timeout
        }
        _ = stop.cancelled() => {
            // Tie-break: a stop request racing an already-elapsed timeout
            // still records the run as timed-out.
            if Instant::now() >= timeout_at {
                StopCause::Timeout
            } else {
                tracing::info!(job_id = %spec.id, run_id = %record.run_id, "Stop requested");
                StopCause::Requested
            }
        }
        _ = force.cancelled() => {
            kill_and_reap(&spec.id, &mut child).await;
            return finalize(record, Outcome::Killed, None, &status_tx, &events).await;
        }
    };

    deliver_signal(&spec.id, &child, spec.stop_signal);

    let exited = tokio::select! {
        res = child.wait() => Some(res),
        _ = tokio::time::sleep(spec.grace_period) => None,
        _ = force.cancelled() => None,
    };

    let (outcome, exit_code) = match exited {
        Some(res) => {
            let (_, exit_code) = classify_exit(&spec.id, res);
            match cause {
                StopCause::Timeout => (Outcome::TimedOut, exit_code),
                // A clean zero exit inside the grace window still counts as
                // completed; anything else was ended by the stop request.
                StopCause::Requested if exit_code == Some(0) => (Outcome::Completed, exit_code),
                StopCause::Requested => (Outcome::Killed, exit_code),
            }
        }
        None => {
            tracing::warn!(
                job_id = %spec.id,
                run_id = %record.run_id,
                grace_period_secs = spec.grace_period.as_secs(),
                "Worker did not exit within grace period, killing"
            );
            kill_and_reap(&spec.id, &mut child).await;
            match cause {
                StopCause::Timeout => (Outcome::TimedOut, None),
                StopCause::Requested => (Outcome::Killed, None),
            }
        }
    };

    record = finalize(record, outcome, exit_code, &status_tx, &events).await;
    record
}

fn classify_exit(
    job_id: &str,
    res: std::io::Result<std::process::ExitStatus>,
) -> (Outcome, Option<i32>) {
    match res {
        Ok(status) if status.success() => (Outcome::Completed, status.code()),
        Ok(status) => (Outcome::Crashed, status.code()),
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to await worker exit");
            (Outcome::Crashed, None)
        }
    }
}

fn deliver_signal(job_id: &str, child: &Child, signal: StopSignal) {
    let Some(pid) = child.id() else {
        // Worker already exited and was reaped.
        return;
    };
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    match nix::sys::signal::kill(pid, signal.as_nix()) {
        Ok(()) => tracing::info!(job_id, %pid, signal = %signal, "Delivered stop signal"),
        // ESRCH means the worker exited between the check and the kill.
        Err(e) => tracing::debug!(job_id, %pid, signal = %signal, error = %e, "Signal not delivered"),
    }
}

async fn kill_and_reap(job_id: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(job_id, error = %e, "SIGKILL not delivered");
    }
    if let Err(e) = child.wait().await {
        tracing::error!(job_id, error = %e, "Failed to reap killed worker");
    }
}

async fn finalize(
    mut record: RunRecord,
    outcome: Outcome,
    exit_code: Option<i32>,
    status_tx: &watch::Sender<RunRecord>,
    events: &mpsc::Sender<RunRecord>,
) -> RunRecord {
    record.finish(outcome, exit_code);
    tracing::info!(
        job_id = %record.job_id,
        run_id = %record.run_id,
        outcome = %outcome,
        exit_code = ?exit_code,
        "Run finished"
    );

    status_tx.send_replace(record.clone());
    if events.send(record.clone()).await.is_err() {
        tracing::debug!(job_id = %record.job_id, "Scheduler gone, outcome not reported");
    }
    record
}
