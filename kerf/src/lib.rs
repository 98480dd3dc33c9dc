//! `kerf`
//!
//! A utility for cutting polylines on Zünd cutters that speak HPGL.
//!
//! A job goes through three steps, each in its own module:
//! * [`workspace`] checks that the geometry fits on the cutter's bed,
//! * [`hpgl`] encodes the polylines and the job parameters as a [`CommandStream`],
//! * [`transport`] sends the stream down a serial port or writes it to a file.
//!
//! [`JobRunner`] drives a job through all three and reports how it ended.

pub mod config;
pub mod geometry;
pub mod hpgl;
pub mod job;
pub mod tool;
pub mod transport;
pub mod workspace;

pub use config::{Config, ConfigError};
pub use geometry::{BoundingBox, Point2D, Polyline};
pub use hpgl::{CommandStream, Directive, JobEncoder};
pub use job::{run_job, Job, JobOutcome, JobReport, JobRequest, JobRunner, JobState};
pub use tool::{JobParameters, ParameterLimits, ToolId};
pub use transport::{send, Connector, SystemConnector, TransportError, TransportTarget};
pub use workspace::{fits, BoundsError, Workspace};
