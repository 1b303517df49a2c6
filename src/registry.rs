//! Immutable catalog of job definitions.
//!
//! The registry is built once at startup from the manifest and never mutated
//! afterwards. `load` rejects manifests that could make two jobs collide at
//! runtime (duplicate ids, duplicate diagnostic ports, overlapping output
//! directories) so that a bad manifest fails before any worker is spawned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{JobConfig, ManifestConfig};
use crate::error::{HarvestError, Result};

/// Governs whether a finished or crashed run is rescheduled automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Reschedule after every run, even if the job was stopped explicitly.
    Always,
    /// Reschedule unless an operator explicitly stopped the job.
    UnlessStopped,
    /// Run once, then park the job permanently.
    Never,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
            RestartPolicy::Never => write!(f, "never"),
        }
    }
}

/// Polite-termination signal delivered on stop requests and timeouts.
///
/// The forceful signal is always SIGKILL and is not configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    Int,
    Term,
    Hup,
    Quit,
    Usr1,
    Usr2,
}

impl StopSignal {
    pub fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            StopSignal::Int => Signal::SIGINT,
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Hup => Signal::SIGHUP,
            StopSignal::Quit => Signal::SIGQUIT,
            StopSignal::Usr1 => Signal::SIGUSR1,
            StopSignal::Usr2 => Signal::SIGUSR2,
        }
    }
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_nix())
    }
}

/// Live-inspection console bound to a worker-local port.
///
/// The core only validates port uniqueness and passes the credentials through
/// to the worker's environment; the console itself is implemented by the
/// worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticConsole {
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// One configured job. Immutable after registry load.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    /// Pass-through configuration for the worker; not interpreted by the core.
    pub env: HashMap<String, String>,
    /// Hard ceiling on a single run's wall-clock duration.
    pub timeout: Duration,
    /// Minimum spacing between the end of one run and the start of the next.
    pub cooldown: Duration,
    /// Time allowed between the polite stop signal and the forceful kill.
    pub grace_period: Duration,
    pub stop_signal: StopSignal,
    pub restart: RestartPolicy,
    /// Job-specific output subpath; validated against collisions at load.
    pub output_dir: Option<PathBuf>,
    pub diagnostic: Option<DiagnosticConsole>,
}

impl JobSpec {
    /// Environment the worker is launched with: the pass-through map plus the
    /// paths and console settings the core manages.
    pub fn worker_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        if let Some(dir) = &self.output_dir {
            env.push(("HARVESTD_OUTPUT_DIR".into(), dir.display().to_string()));
        }
        if let Some(console) = &self.diagnostic {
            env.push(("HARVESTD_CONSOLE_PORT".into(), console.port.to_string()));
            env.push(("HARVESTD_CONSOLE_USERNAME".into(), console.username.clone()));
            env.push(("HARVESTD_CONSOLE_PASSWORD".into(), console.password.clone()));
        }
        env
    }
}

/// Ordered, read-only collection of [`JobSpec`]s.
#[derive(Debug)]
pub struct Registry {
    jobs: Vec<JobSpec>,
    by_id: HashMap<String, usize>,
}

impl Registry {
    /// Build and validate the registry from a parsed manifest.
    ///
    /// Fails with [`HarvestError::Config`] on duplicate ids, duplicate
    /// diagnostic ports, empty or blank commands, non-positive timeouts,
    /// negative durations, overlapping output directories, or a diagnostic
    /// console with blank credentials.
    pub fn load(manifest: &ManifestConfig) -> Result<Self> {
        let mut jobs = Vec::with_capacity(manifest.job.len());
        let mut by_id = HashMap::new();
        let mut ports: HashMap<u16, String> = HashMap::new();
        let mut output_dirs: Vec<(PathBuf, String)> = Vec::new();

        for job in &manifest.job {
            let spec = Self::validate_job(job)?;

            if by_id.contains_key(&spec.id) {
                return Err(HarvestError::Config(format!(
                    "duplicate job id '{}'",
                    spec.id
                )));
            }

            if let Some(console) = &spec.diagnostic {
                if let Some(other) = ports.insert(console.port, spec.id.clone()) {
                    return Err(HarvestError::Config(format!(
                        "diagnostic port {} is used by both '{}' and '{}'",
                        console.port, other, spec.id
                    )));
                }
            }

            if let Some(dir) = &spec.output_dir {
                for (existing, owner) in &output_dirs {
                    if existing.starts_with(dir) || dir.starts_with(existing) {
                        return Err(HarvestError::Config(format!(
                            "output dir '{}' of job '{}' overlaps '{}' of job '{}'",
                            dir.display(),
                            spec.id,
                            existing.display(),
                            owner
                        )));
                    }
                }
                output_dirs.push((dir.clone(), spec.id.clone()));
            }

            by_id.insert(spec.id.clone(), jobs.len());
            jobs.push(spec);
        }

        Ok(Self { jobs, by_id })
    }

    fn validate_job(job: &JobConfig) -> Result<JobSpec> {
        if job.id.trim().is_empty() {
            return Err(HarvestError::Config("job id must not be empty".into()));
        }
        if job.command.is_empty() || job.command[0].trim().is_empty() {
            return Err(HarvestError::Config(format!(
                "job '{}' has a malformed command",
                job.id
            )));
        }

        let timeout = positive_secs(&job.id, "timeout_secs", job.timeout_secs)?;
        let cooldown = non_negative_secs(&job.id, "cooldown_secs", job.cooldown_secs)?;
        let grace_period =
            non_negative_secs(&job.id, "grace_period_secs", job.grace_period_secs)?;

        if let Some(console) = &job.diagnostic {
            if console.username.trim().is_empty() || console.password.trim().is_empty() {
                return Err(HarvestError::Config(format!(
                    "job '{}' enables the diagnostic console without credentials",
                    job.id
                )));
            }
        }

        Ok(JobSpec {
            id: job.id.clone(),
            command: job.command.clone(),
            env: job.env.clone(),
            timeout,
            cooldown,
            grace_period,
            stop_signal: job.stop_signal,
            restart: job.restart,
            output_dir: job.output_dir.clone(),
            diagnostic: job.diagnostic.clone(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&JobSpec> {
        self.by_id.get(id).map(|&i| &self.jobs[i])
    }

    /// Jobs in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &JobSpec> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn positive_secs(job: &str, field: &str, value: i64) -> Result<Duration> {
    if value <= 0 {
        return Err(HarvestError::Config(format!(
            "job '{job}': {field} must be positive, got {value}"
        )));
    }
    Ok(Duration::from_secs(value as u64))
}

fn non_negative_secs(job: &str, field: &str, value: i64) -> Result<Duration> {
    if value < 0 {
        return Err(HarvestError::Config(format!(
            "job '{job}': {field} must not be negative, got {value}"
        )));
    }
    Ok(Duration::from_secs(value as u64))
}
