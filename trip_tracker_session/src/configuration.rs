use std::{path::{Path, PathBuf}, str::FromStr, time::Duration};

use tracing::warn;

use crate::{sampler::AccuracyGate, TrackerError, EXPORT_DIR};

/// Tunables for sampling and distance accumulation.
///
/// Loaded from a plain `key = value` file; `#` starts a comment line.
///
/// ```text
/// # strict fix before arming a trip
/// midpoint_accuracy_m = 15
/// tracking_accuracy_m = 10
/// sample_interval_ms = 10000
/// min_movement_m = 5
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub midpoint_accuracy_m: f64,
    pub midpoint_max_attempts: u32,

    pub tracking_accuracy_m: f64,
    pub tracking_max_attempts: u32,

    pub retry_delay: Duration,
    pub sample_interval: Duration,
    pub min_movement_m: f64,

    /// Accuracy assumed for replayed GPX points that carry no HDOP.
    pub replay_accuracy_m: f64,
    pub output_dir: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            midpoint_accuracy_m: 15.,
            midpoint_max_attempts: 10,
            tracking_accuracy_m: 10.,
            tracking_max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            sample_interval: Duration::from_secs(10),
            min_movement_m: 5.,
            replay_accuracy_m: 5.,
            output_dir: default_output_dir(),
        }
    }
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| TrackerError::Config(format!("Failed to read config file {:?}: {}", path, err)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TrackerError> {
        let mut config = Self::default();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(TrackerError::Config(format!("Line {}: expected key = value, got {:?}", number + 1, line)));
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "midpoint_accuracy_m" => config.midpoint_accuracy_m = parse_value(key, value)?,
                "midpoint_max_attempts" => config.midpoint_max_attempts = parse_value(key, value)?,
                "tracking_accuracy_m" => config.tracking_accuracy_m = parse_value(key, value)?,
                "tracking_max_attempts" => config.tracking_max_attempts = parse_value(key, value)?,
                "retry_delay_ms" => config.retry_delay = Duration::from_millis(parse_value(key, value)?),
                "sample_interval_ms" => config.sample_interval = Duration::from_millis(parse_value(key, value)?),
                "min_movement_m" => config.min_movement_m = parse_value(key, value)?,
                "replay_accuracy_m" => config.replay_accuracy_m = parse_value(key, value)?,
                "output_dir" => config.output_dir = PathBuf::from(value),
                _ => warn!("Unknown config key: {}", key),
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.sample_interval.is_zero() {
            return Err(TrackerError::Config("sample_interval_ms must be positive".into()));
        }
        if !self.min_movement_m.is_finite() || self.min_movement_m < 0. {
            return Err(TrackerError::Config(format!("min_movement_m must be >= 0, got {}", self.min_movement_m)));
        }
        self.midpoint_gate().validate()?;
        self.tracking_gate().validate()?;
        Ok(())
    }

    /// Strict gate used once, to pin the midpoint.
    pub fn midpoint_gate(&self) -> AccuracyGate {
        AccuracyGate::with_attempts(self.midpoint_accuracy_m, self.midpoint_max_attempts, self.retry_delay)
    }

    pub fn tracking_gate(&self) -> AccuracyGate {
        AccuracyGate::with_attempts(self.tracking_accuracy_m, self.tracking_max_attempts, self.retry_delay)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, TrackerError> {
    value
        .parse()
        .map_err(|_| TrackerError::Config(format!("Invalid value for {}: {:?}", key, value)))
}

fn default_output_dir() -> PathBuf {
    match project_root::get_project_root() {
        Ok(root) => root.join(EXPORT_DIR),
        Err(_) => PathBuf::from(EXPORT_DIR),
    }
}
