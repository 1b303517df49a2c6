//! TOML manifest describing the supervisor and its jobs.
//!
//! Durations are expressed in whole seconds and parsed as signed integers so
//! that negative values are rejected at registry load instead of silently
//! wrapping. Defaults mirror the original harvester deployment: a 10 hour
//! run ceiling, 6 hours between runs, and a 15 minute grace period.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::registry::{DiagnosticConsole, RestartPolicy, StopSignal};

pub const DEFAULT_TIMEOUT_SECS: i64 = 36_000; // 10h
pub const DEFAULT_COOLDOWN_SECS: i64 = 21_600; // 6h
pub const DEFAULT_GRACE_PERIOD_SECS: i64 = 900; // 15m

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub job: Vec<JobConfig>,
}

impl ManifestConfig {
    /// Read and parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            HarvestError::Config(format!("cannot parse manifest {}: {e}", path.display()))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// How often the scheduler re-checks idle jobs for eligibility.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Persist last-completion timestamps so cooldowns survive a supervisor
    /// restart. Off by default.
    #[serde(default)]
    pub persist_state: bool,

    /// Where the persisted timestamps live when `persist_state` is on.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Bind address for the read-only HTTP status server. Disabled if unset.
    #[serde(default)]
    pub status_addr: Option<SocketAddr>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            persist_state: false,
            state_file: default_state_file(),
            status_addr: None,
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_state_file() -> PathBuf {
    PathBuf::from("harvestd-state.json")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub id: String,

    /// Executable followed by its arguments.
    pub command: Vec<String>,

    /// Pass-through key/value configuration for the worker.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,

    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: i64,

    #[serde(default = "default_stop_signal")]
    pub stop_signal: StopSignal,

    #[serde(default = "default_restart_policy")]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub diagnostic: Option<DiagnosticConsole>,
}

fn default_timeout_secs() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_cooldown_secs() -> i64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_grace_period_secs() -> i64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_stop_signal() -> StopSignal {
    StopSignal::Int
}

fn default_restart_policy() -> RestartPolicy {
    RestartPolicy::UnlessStopped
}
