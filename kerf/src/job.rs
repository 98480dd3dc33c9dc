//! `job`
//!
//! Runs a job from start to finish: check it fits, encode it, send it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    geometry::{bounding_boxes, BoundingBox, Polyline},
    hpgl::JobEncoder,
    tool::{JobParameters, ParameterLimits, ToolId},
    transport::{
        resolve_target, send_with, Connector, SystemConnector, TargetLocks, TransportError,
        TransportTarget,
    },
    workspace::{self, BoundsError, Workspace},
};

/// A job as submitted by the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// The paths to cut, in order.
    pub polylines: Vec<Polyline>,
    /// Tool, depth and speed.
    pub params: JobParameters,
    /// Bounding boxes of the geometry, checked against the workspace.
    pub bounds: Vec<BoundingBox>,
}

impl Job {
    /// Creates a job, working out the bounding boxes from the polylines.
    ///
    /// # Arguments
    /// * `polylines`: The paths to cut.
    /// * `params`: Tool, depth and speed.
    #[must_use]
    pub fn new(polylines: Vec<Polyline>, params: JobParameters) -> Self {
        let bounds = bounding_boxes(&polylines);
        Job {
            polylines,
            params,
            bounds,
        }
    }

    /// Creates a job whose bounding boxes were measured by the caller.
    ///
    /// # Arguments
    /// * `polylines`: The paths to cut.
    /// * `params`: Tool, depth and speed.
    /// * `bounds`: Bounding boxes of the curves before they were flattened.
    #[must_use]
    pub fn with_bounds(
        polylines: Vec<Polyline>,
        params: JobParameters,
        bounds: Vec<BoundingBox>,
    ) -> Self {
        Job {
            polylines,
            params,
            bounds,
        }
    }
}

/// A job as it arrives from outside, in a job file or over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// The paths to cut, in order.
    pub polylines: Vec<Polyline>,
    /// The tool to cut with.
    #[serde(default)]
    pub tool: ToolId,
    /// Cutting depth in mm, the configured default if missing.
    pub depth_mm: Option<f64>,
    /// Cutting speed in mm/s, the configured default if missing.
    pub speed_mm_per_sec: Option<u32>,
    /// Bounding boxes measured by the caller, worked out from the polylines if missing.
    pub bounds: Option<Vec<BoundingBox>>,
}

impl JobRequest {
    /// Turns the request into a [`Job`], clamping depth and speed to the configured limits.
    ///
    /// # Arguments
    /// * `limits`: The accepted ranges for depth and speed.
    ///
    /// # Returns
    /// A job that is ready to run.
    #[must_use]
    pub fn into_job(self, limits: &ParameterLimits) -> Job {
        let params = limits.parameters(self.tool, self.depth_mm, self.speed_mm_per_sec);
        match self.bounds {
            Some(bounds) => Job::with_bounds(self.polylines, params, bounds),
            None => Job::new(self.polylines, params),
        }
    }
}

/// Where a job is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Submitted, nothing done yet.
    Idle,
    /// Checking the geometry against the workspace.
    Validating,
    /// Building the command stream.
    Encoding,
    /// Sending the stream to the target.
    Transmitting,
    /// The stream was delivered in full.
    Completed,
    /// The geometry was refused, nothing was sent.
    Rejected,
    /// Sending failed.
    Failed,
}

impl JobState {
    /// Whether the job has finished, one way or another.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Rejected | JobState::Failed
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// The whole stream reached the target.
    Completed {
        /// Size of the stream that was sent.
        bytes_sent: usize,
    },
    /// The geometry was refused before anything was encoded.
    Rejected(BoundsError),
    /// The target could not be opened or written to.
    Failed(TransportError),
}

impl JobOutcome {
    /// The terminal state this outcome corresponds to.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed { .. } => JobState::Completed,
            JobOutcome::Rejected(_) => JobState::Rejected,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }

    /// Whether the job was delivered.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { bytes_sent } => write!(f, "job sent ({bytes_sent} bytes)"),
            JobOutcome::Rejected(reason) => write!(f, "job rejected: {reason}"),
            JobOutcome::Failed(cause) => write!(f, "job failed: {cause}"),
        }
    }
}

/// What happened while running a job.
#[derive(Debug)]
pub struct JobReport {
    /// Every state the job passed through, starting at [`JobState::Idle`].
    pub states: Vec<JobState>,
    /// How it ended.
    pub outcome: JobOutcome,
}

/// Tracks a single run through the job states.
struct Progress {
    /// States visited so far.
    states: Vec<JobState>,
}

impl Progress {
    /// Starts tracking a job in [`JobState::Idle`].
    fn new() -> Self {
        Progress {
            states: vec![JobState::Idle],
        }
    }

    /// Moves to the next state.
    ///
    /// # Arguments
    /// * `next`: The state to move to.
    fn advance(&mut self, next: JobState) {
        let current = self.states.last().copied().unwrap_or(JobState::Idle);
        debug_assert!(!current.is_terminal(), "job already finished as {current}");
        log::debug!("Job {current} -> {next}");
        self.states.push(next);
    }

    /// Ends the job.
    ///
    /// # Arguments
    /// * `outcome`: How the job ended.
    ///
    /// # Returns
    /// The report for the job.
    fn finish(mut self, outcome: JobOutcome) -> JobReport {
        self.advance(outcome.state());
        match &outcome {
            JobOutcome::Completed { .. } => log::info!("{outcome}"),
            JobOutcome::Rejected(_) | JobOutcome::Failed(_) => log::warn!("{outcome}"),
        }
        JobReport {
            states: self.states,
            outcome,
        }
    }
}

/// Checks, encodes and sends jobs.
///
/// Shareable between threads: sends to the same target are serialised, jobs for
/// different targets may run side by side.
pub struct JobRunner {
    /// The area jobs must fit in.
    workspace: Workspace,
    /// Turns jobs into command streams.
    encoder: JobEncoder,
    /// Where jobs go unless told otherwise.
    target: TransportTarget,
    /// Opens serial ports and files.
    connector: Box<dyn Connector>,
    /// At most one send per target at a time.
    locks: TargetLocks,
}

impl JobRunner {
    /// Creates a runner that talks to real devices.
    ///
    /// # Arguments
    /// * `config`: The process configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        JobRunner::with_connector(config, config.connector())
    }

    /// Creates a runner with a custom way of opening targets.
    ///
    /// # Arguments
    /// * `config`: The process configuration.
    /// * `connector`: Opens serial ports and files.
    #[must_use]
    pub fn with_connector(config: &Config, connector: impl Connector + 'static) -> Self {
        JobRunner {
            workspace: config.workspace,
            encoder: config.encoder(),
            target: config.target.clone(),
            connector: Box::new(connector),
            locks: TargetLocks::default(),
        }
    }

    /// Gets the configured target.
    ///
    /// # Returns
    /// Where [`JobRunner::run`] sends jobs.
    #[must_use]
    pub fn target(&self) -> &TransportTarget {
        &self.target
    }

    /// Runs a job against the configured target.
    ///
    /// # Arguments
    /// * `job`: The job to run.
    ///
    /// # Returns
    /// The report for the job, never retried.
    #[must_use]
    pub fn run(&self, job: &Job) -> JobReport {
        self.run_to(job, &self.target)
    }

    /// Runs a job against a specific target.
    ///
    /// # Arguments
    /// * `job`: The job to run.
    /// * `target`: Where to send the job.
    ///
    /// # Returns
    /// The report for the job, never retried.
    #[must_use]
    pub fn run_to(&self, job: &Job, target: &TransportTarget) -> JobReport {
        let mut progress = Progress::new();

        progress.advance(JobState::Validating);
        let drawn = bounding_boxes(&job.polylines);
        match workspace::check_declared(&job.bounds, &drawn, &self.workspace) {
            Ok(extent) => log::debug!("Curves span {extent}, inside the workspace"),
            Err(reason) => return progress.finish(JobOutcome::Rejected(reason)),
        }

        progress.advance(JobState::Encoding);
        log::info!(
            "Cutting {} polylines with {} at {}mm deep, {}mm/s",
            job.polylines.len(),
            job.params.tool,
            job.params.depth_mm,
            job.params.speed_mm_per_sec
        );
        let stream = self.encoder.encode(&job.polylines, &job.params);
        let bytes_sent = stream.to_bytes().len();

        progress.advance(JobState::Transmitting);
        let connector = self.connector.as_ref();
        let sent = resolve_target(connector, target).and_then(|target| {
            self.locks
                .with_lock(&target, || send_with(connector, &stream, &target))
        });

        match sent {
            Ok(()) => progress.finish(JobOutcome::Completed { bytes_sent }),
            Err(cause) => progress.finish(JobOutcome::Failed(cause)),
        }
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        JobRunner::with_connector(&Config::default(), SystemConnector::default())
    }
}

/// Runs a single job with real devices.
///
/// # Arguments
/// * `config`: The process configuration.
/// * `job`: The job to run.
///
/// # Returns
/// How the job ended.
#[must_use]
pub fn run_job(config: &Config, job: &Job) -> JobOutcome {
    JobRunner::new(config).run(job).outcome
}
