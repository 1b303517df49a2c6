use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Terminal classification of a single run. `Running` is the only
/// non-terminal state; exactly one of the others is recorded per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Running,
    /// Worker exited on its own with status zero.
    Completed,
    /// Worker exited on its own with a non-zero or abnormal status.
    Crashed,
    /// The run hit its timeout ceiling and was stopped by the supervisor.
    TimedOut,
    /// The run was terminated by an external stop request.
    Killed,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        self != Outcome::Running
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Running => write!(f, "running"),
            Outcome::Completed => write!(f, "completed"),
            Outcome::Crashed => write!(f, "crashed"),
            Outcome::TimedOut => write!(f, "timed-out"),
            Outcome::Killed => write!(f, "killed"),
        }
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

impl RunRecord {
    pub fn new(job_id: &str, pid: Option<u32>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: Outcome::Running,
            pid,
            exit_code: None,
        }
    }

    /// Finalize the record with its terminal outcome.
    pub fn finish(&mut self, outcome: Outcome, exit_code: Option<i32>) {
        debug_assert!(outcome.is_terminal());
        self.outcome = outcome;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
    }
}
