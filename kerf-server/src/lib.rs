//! # kerf-server
//!
//! Accepts jobs as JSON over HTTP and runs them on the configured cutter, one at a time per
//! target.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
pub use kerf;
use kerf::{Config, JobOutcome, JobRequest, JobRunner, ParameterLimits};
use serde::{Deserialize, Serialize};

/// What `GET /` answers with.
pub const BANNER: &str = "kerf: POST polylines to /jobs to cut them";

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    /// Runs jobs against the configured target.
    runner: Arc<JobRunner>,
    /// Accepted ranges for depth and speed.
    limits: ParameterLimits,
}

impl AppState {
    /// Builds the shared state from the configuration.
    ///
    /// # Arguments
    /// * `config`: The validated configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_runner(config, JobRunner::new(config))
    }

    /// Builds the shared state around an existing runner.
    ///
    /// # Arguments
    /// * `config`: The validated configuration, only the limits are taken from it.
    /// * `runner`: The runner that jobs are handed to.
    #[must_use]
    pub fn with_runner(config: &Config, runner: JobRunner) -> Self {
        AppState {
            runner: Arc::new(runner),
            limits: config.limits,
        }
    }
}

/// The body sent back for every submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    /// The state the job finished in.
    pub state: String,
    /// What happened, in words.
    pub message: String,
}

/// Builds the router with all routes.
///
/// # Arguments
/// * `state`: The state shared by the handlers.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(BANNER))
        .route("/jobs", post(submit_job))
        .with_state(state)
}

/// Handles requests to cut a job on the attached device.
///
/// Answers 200 if the job completed, 422 if the geometry was rejected and 502 if the device
/// could not be reached or the write failed.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> Response {
    let job = request.into_job(&state.limits);
    log::info!(
        "Received job: {} polylines with {}",
        job.polylines.len(),
        job.params.tool
    );

    let runner = Arc::clone(&state.runner);
    let report = match tokio::task::spawn_blocking(move || runner.run(&job)).await {
        Ok(report) => report,
        Err(err) => {
            log::error!("Job task did not finish: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let status = match &report.outcome {
        JobOutcome::Completed { .. } => StatusCode::OK,
        JobOutcome::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        JobOutcome::Failed(_) => StatusCode::BAD_GATEWAY,
    };
    let body = JobResponse {
        state: report.outcome.state().to_string(),
        message: report.outcome.to_string(),
    };
    (status, Json(body)).into_response()
}
