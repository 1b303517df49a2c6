pub mod config;
pub mod cooldown;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod supervisor;
