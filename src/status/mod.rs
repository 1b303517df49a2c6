//! Read-only HTTP status server.
//!
//! Serves a small page plus a JSON view of every job's scheduling state and
//! recent run history, so an operator can reconstruct what each job did
//! without inspecting supervisor internals. Job definitions are immutable at
//! runtime, so there is deliberately no mutation endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::{JobEntry, JobTable};
use crate::supervisor::RunRecord;

#[derive(Clone)]
pub struct StatusState {
    pub table: Arc<RwLock<JobTable>>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    state: String,
    restart: String,
    stop_signal: String,
    timeout_secs: u64,
    cooldown_secs: u64,
    grace_period_secs: u64,
    next_eligible: Option<chrono::DateTime<chrono::Utc>>,
    last_outcome: Option<String>,
    runs: usize,
    current: Option<RunRecord>,
}

impl JobResponse {
    fn from_entry(entry: &JobEntry) -> Self {
        Self {
            id: entry.spec.id.clone(),
            state: entry.state.to_string(),
            restart: entry.spec.restart.to_string(),
            stop_signal: entry.spec.stop_signal.to_string(),
            timeout_secs: entry.spec.timeout.as_secs(),
            cooldown_secs: entry.spec.cooldown.as_secs(),
            grace_period_secs: entry.spec.grace_period.as_secs(),
            next_eligible: entry.next_eligible,
            last_outcome: entry.last_outcome().map(|o| o.to_string()),
            runs: entry.runs(),
            current: entry.current.clone(),
        }
    }
}

pub async fn run_status_server(addr: SocketAddr, state: StatusState) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/runs", get(list_runs_handler))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %addr, "Starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Status server failed");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn list_jobs_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let table = state.table.read().await;
    let jobs: Vec<JobResponse> = table.entries().iter().map(JobResponse::from_entry).collect();
    Json(jobs)
}

/// Recent runs across all jobs, newest first.
async fn list_runs_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let table = state.table.read().await;
    let mut runs: Vec<RunRecord> = table
        .entries()
        .iter()
        .flat_map(|entry| entry.history.iter().cloned())
        .chain(
            table
                .entries()
                .iter()
                .filter_map(|entry| entry.current.clone()),
        )
        .collect();
    runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
    Json(runs)
}
