use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::cooldown::CooldownTracker;
use crate::registry::{JobSpec, Registry, RestartPolicy};
use crate::supervisor::{Outcome, RunRecord};

/// Run records retained per job for the status API.
pub const RUN_HISTORY_LIMIT: usize = 32;

/// Per-job scheduling state.
///
/// `idle -> running -> idle (after cooldown) -> ...`, with `stopped` as the
/// absorbing state entered when the restart policy parks the job or the
/// whole system shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
            JobState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug)]
pub struct JobEntry {
    pub spec: JobSpec,
    pub state: JobState,
    /// Explicit administrative stop, distinct from the restart policy's
    /// automatic behavior. Jobs with `restart = always` ignore it for
    /// rescheduling.
    pub stopped: bool,
    pub next_eligible: Option<DateTime<Utc>>,
    pub current: Option<RunRecord>,
    pub history: VecDeque<RunRecord>,
}

impl JobEntry {
    fn new(spec: JobSpec, next_eligible: Option<DateTime<Utc>>) -> Self {
        Self {
            spec,
            state: JobState::Idle,
            stopped: false,
            next_eligible,
            current: None,
            history: VecDeque::new(),
        }
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.history.back().map(|r| r.outcome)
    }

    pub fn runs(&self) -> usize {
        self.history.len()
    }
}

/// Mutable scheduling state for every configured job, in manifest order.
///
/// Shared between the scheduler loop (writer) and the status server
/// (reader) behind an `RwLock`.
#[derive(Debug)]
pub struct JobTable {
    entries: Vec<JobEntry>,
}

impl JobTable {
    /// Seed the table from the registry, honoring any persisted cooldown
    /// state so a restarted supervisor does not start jobs early.
    pub fn new(registry: &Registry, cooldowns: &CooldownTracker) -> Self {
        let entries = registry
            .iter()
            .map(|spec| {
                let next_eligible = cooldowns.next_eligible(&spec.id, spec.cooldown);
                JobEntry::new(spec.clone(), next_eligible)
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[JobEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&JobEntry> {
        self.entries.iter().find(|e| e.spec.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut JobEntry> {
        self.entries.iter_mut().find(|e| e.spec.id == id)
    }

    /// Administratively stop a job: it is never rescheduled again unless its
    /// restart policy is `always`. Returns false for unknown ids.
    pub fn stop_job(&mut self, id: &str) -> bool {
        let Some(entry) = self.get_mut(id) else {
            return false;
        };
        entry.stopped = true;
        if entry.state == JobState::Idle && entry.spec.restart != RestartPolicy::Always {
            entry.state = JobState::Stopped;
        }
        true
    }

    /// Idle jobs whose cooldown has elapsed and whose policy permits a start.
    /// Claims them (marks running) so a job is never dispatched twice.
    pub(crate) fn take_due(&mut self, now: DateTime<Utc>) -> Vec<JobSpec> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.state != JobState::Idle {
                continue;
            }
            if entry.stopped && entry.spec.restart != RestartPolicy::Always {
                entry.state = JobState::Stopped;
                continue;
            }
            if let Some(at) = entry.next_eligible {
                if now < at {
                    continue;
                }
            }
            entry.state = JobState::Running;
            due.push(entry.spec.clone());
        }
        due
    }

    pub(crate) fn mark_running(&mut self, id: &str, record: RunRecord) {
        if let Some(entry) = self.get_mut(id) {
            entry.state = JobState::Running;
            entry.current = Some(record);
        }
    }

    /// Record a finalized run and move the job to its next state per the
    /// restart policy.
    pub(crate) fn mark_finished(
        &mut self,
        record: RunRecord,
        next_eligible: Option<DateTime<Utc>>,
    ) {
        let Some(entry) = self.get_mut(&record.job_id) else {
            return;
        };
        entry.current = None;
        entry.history.push_back(record);
        while entry.history.len() > RUN_HISTORY_LIMIT {
            entry.history.pop_front();
        }
        entry.state = match entry.spec.restart {
            RestartPolicy::Never => JobState::Stopped,
            RestartPolicy::UnlessStopped if entry.stopped => JobState::Stopped,
            _ => {
                entry.next_eligible = next_eligible;
                JobState::Idle
            }
        };
    }

    /// Park every job; used when the whole system shuts down.
    pub(crate) fn park_all(&mut self) {
        for entry in &mut self.entries {
            entry.state = JobState::Stopped;
            entry.current = None;
        }
    }

    pub fn running(&self) -> impl Iterator<Item = &JobEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == JobState::Running)
    }
}
