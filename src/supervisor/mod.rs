//! Per-run process supervision.
//!
//! One [`ProcessSupervisor`] instance owns the lifecycle of one worker run:
//!
//! 1. Spawn the worker with the job's command and environment
//! 2. Watch the timeout and (after a stop request) the grace period
//! 3. Escalate from the polite stop signal to SIGKILL when needed
//! 4. Report the terminal [`run::Outcome`] exactly once
//!
//! Workers are opaque: the supervisor observes spawn success, exit status,
//! signals delivered and wall-clock timestamps, never stdout/stderr content.

pub mod process;
pub mod run;

pub use process::{ProcessSupervisor, SupervisorHandle};
pub use run::{Outcome, RunRecord};
