//! Tracks when each job last finished and when it may start again.
//!
//! Persistence is an explicit configuration choice: with a state file the
//! tracker writes its timestamps as JSON after every completion and replays
//! them at startup, so cooldowns are honored across restarts of the
//! supervisor itself. Without one, every job is immediately eligible at boot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{HarvestError, Result};

#[derive(Debug)]
pub struct CooldownTracker {
    last_end: HashMap<String, DateTime<Utc>>,
    state_file: Option<PathBuf>,
}

impl CooldownTracker {
    /// Tracker without persistence; state is lost on restart.
    pub fn in_memory() -> Self {
        Self {
            last_end: HashMap::new(),
            state_file: None,
        }
    }

    /// Tracker backed by a JSON state file. Existing state is read back so
    /// cooldowns carry over from the previous supervisor process.
    pub fn with_state_file(path: PathBuf) -> Result<Self> {
        let last_end = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                HarvestError::State(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&raw).map_err(|e| {
                HarvestError::State(format!("cannot parse {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };

        if !last_end.is_empty() {
            tracing::info!(
                state_file = %path.display(),
                jobs = last_end.len(),
                "Restored cooldown state"
            );
        }

        Ok(Self {
            last_end,
            state_file: Some(path),
        })
    }

    /// Record that a run of `job_id` ended at `end_time`.
    ///
    /// Later completions overwrite earlier ones; the tracker only needs the
    /// most recent end to compute eligibility.
    pub fn record_completion(&mut self, job_id: &str, end_time: DateTime<Utc>) -> Result<()> {
        self.last_end.insert(job_id.to_string(), end_time);
        self.persist()
    }

    pub fn last_end(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.last_end.get(job_id).copied()
    }

    /// Earliest legal next start, or `None` if the job has never run and is
    /// immediately eligible.
    pub fn next_eligible(&self, job_id: &str, cooldown: Duration) -> Option<DateTime<Utc>> {
        self.last_end
            .get(job_id)
            .map(|end| *end + chrono::Duration::seconds(cooldown.as_secs() as i64))
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let raw = serde_json::to_vec_pretty(&self.last_end)
            .map_err(|e| HarvestError::State(format!("cannot encode state: {e}")))?;
        std::fs::write(path, raw)
            .map_err(|e| HarvestError::State(format!("cannot write {}: {e}", path.display())))
    }
}
