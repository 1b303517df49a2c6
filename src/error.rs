use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to spawn job {job_id}: {source}")]
    Spawn {
        job_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
