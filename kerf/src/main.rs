//! `kerf`
//!
//! Sends a job file to the cutter, or dumps it to a plot file.

use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use kerf::{Config, JobRequest, JobRunner, JobState, ToolId, TransportTarget};

/// Cut polylines on a Zünd cutter.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// JSON job file with the polylines to cut and, optionally, tool, depth and speed.
    job: PathBuf,
    /// JSON configuration file, built-in defaults are used if not given.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the HPGL to this file instead of the configured target.
    #[arg(long)]
    dump: Option<PathBuf>,
    /// Tool to cut with: Tool1, Tool2 or Pen.
    #[arg(long)]
    tool: Option<ToolId>,
    /// Cutting depth in mm.
    #[arg(long)]
    depth: Option<f64>,
    /// Cutting speed in mm/s.
    #[arg(long)]
    speed: Option<u32>,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let text = fs::read_to_string(&args.job)
        .with_context(|| format!("failed to read job file {}", args.job.display()))?;
    let mut request: JobRequest = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse job file {}", args.job.display()))?;
    if let Some(tool) = args.tool {
        request.tool = tool;
    }
    if args.depth.is_some() {
        request.depth_mm = args.depth;
    }
    if args.speed.is_some() {
        request.speed_mm_per_sec = args.speed;
    }

    let job = request.into_job(&config.limits);
    println!("Tool = {}", job.params.tool);
    println!("Depth in mm = {}", job.params.depth_mm);
    println!("Speed in mm/s = {}", job.params.speed_mm_per_sec);

    let runner = JobRunner::new(&config);
    let target = match args.dump {
        Some(path) => TransportTarget::File { path },
        None => runner.target().clone(),
    };
    println!("Sending to {target}, please wait...");

    let report = runner.run_to(&job, &target);
    println!("{}", report.outcome);

    Ok(match report.outcome.state() {
        JobState::Completed => ExitCode::SUCCESS,
        JobState::Rejected => ExitCode::from(2),
        _ => ExitCode::from(3),
    })
}
