use chrono::{DateTime, Utc};
use trip_tracker_lib::TripError;

use crate::{location::CapabilityError, session::TripState};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Retryable: the device could not produce a good enough fix.
    #[error("Location unavailable after {attempts} attempt(s): {reason}")]
    LocationUnavailable {
        reason: UnavailableReason,
        attempts: u32,
        last_accuracy_m: Option<f64>,
    },

    #[error("Precondition not met: {0}")]
    PreconditionNotMet(Precondition),

    /// A result arrived for a tracking run that is no longer active.
    #[error("Result arrived after the tracking run ended")]
    StaleResult,

    #[error("Invalid accuracy gate: {0}")]
    InvalidGate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Trip(#[from] TripError),

    #[error("GPX error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("Timestamp {timestamp} cannot be written to GPX")]
    GpxTimestamp { timestamp: DateTime<Utc> },

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnavailableReason {
    #[error("{0}")]
    Capability(#[from] CapabilityError),

    #[error("accuracy never reached the required threshold")]
    AccuracyNotReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("no midpoint has been set")]
    MissingMidpoint,

    #[error("the trip has no name")]
    MissingName,

    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: TripState },
}

impl From<Precondition> for TrackerError {
    fn from(value: Precondition) -> Self {
        TrackerError::PreconditionNotMet(value)
    }
}
