//! `config`
//!
//! Startup configuration, read once from a JSON file and passed around explicitly.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use ascii::AsciiString;
use serde::{Deserialize, Serialize};

use crate::{
    hpgl::{JobEncoder, DEFAULT_JOB_LABEL},
    tool::ParameterLimits,
    transport::{SystemConnector, TransportTarget, DEFAULT_WRITE_TIMEOUT},
    workspace::Workspace,
};

/// Address the job server listens on by default.
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:7475";

/// Errors that can occur while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        /// The file we tried to read.
        path: PathBuf,
        /// Why it failed.
        source: io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// The values parse but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything that is fixed for the lifetime of the process.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The cutter's travel area.
    pub workspace: Workspace,
    /// Accepted ranges and defaults for depth and speed.
    pub limits: ParameterLimits,
    /// Label shown on the device while a job runs.
    pub job_label: AsciiString,
    /// Where jobs are sent.
    pub target: TransportTarget,
    /// How long one serial write may block, in seconds.
    pub serial_write_timeout_secs: u64,
    /// Address the job server binds to.
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace: Workspace::default(),
            limits: ParameterLimits::default(),
            job_label: AsciiString::from_ascii(DEFAULT_JOB_LABEL).unwrap_or_default(),
            target: TransportTarget::default(),
            serial_write_timeout_secs: DEFAULT_WRITE_TIMEOUT.as_secs(),
            listen: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path`: The file to load.
    ///
    /// # Returns
    /// The validated configuration.
    ///
    /// # Errors
    /// If the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_json(&text)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses the configuration from a JSON string.
    ///
    /// # Arguments
    /// * `json`: The configuration JSON.
    ///
    /// # Returns
    /// The validated configuration.
    ///
    /// # Errors
    /// If the JSON cannot be parsed or the values are inconsistent.
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the ranges in the configuration are well formed.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.workspace;
        if !(ws.min_x < ws.max_x && ws.min_y < ws.max_y) {
            return Err(ConfigError::Invalid(format!("workspace {ws} is empty")));
        }

        let depth = &self.limits.depth_mm;
        if !(depth.min <= depth.default && depth.default <= depth.max) || depth.min <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "depth range {}..={} with default {} is not valid",
                depth.min, depth.max, depth.default
            )));
        }

        let speed = &self.limits.speed_mm_per_sec;
        if !(speed.min <= speed.default && speed.default <= speed.max) || speed.min == 0 {
            return Err(ConfigError::Invalid(format!(
                "speed range {}..={} with default {} is not valid",
                speed.min, speed.max, speed.default
            )));
        }

        if let Some(bad) = self
            .job_label
            .as_str()
            .chars()
            .find(|c| *c == ';' || c.is_ascii_control())
        {
            return Err(ConfigError::Invalid(format!(
                "job label {:?} must not contain {bad:?}",
                self.job_label.as_str()
            )));
        }

        if let TransportTarget::SerialPort { baud_rate: 0, .. } = self.target {
            return Err(ConfigError::Invalid("baud rate must not be 0".to_string()));
        }

        Ok(())
    }

    /// Builds the encoder for this configuration.
    #[must_use]
    pub fn encoder(&self) -> JobEncoder {
        JobEncoder::new(self.job_label.clone())
    }

    /// Builds the connector that opens real ports and files.
    #[must_use]
    pub fn connector(&self) -> SystemConnector {
        SystemConnector::new(Duration::from_secs(self.serial_write_timeout_secs))
    }
}
