use std::{collections::VecDeque, sync::{atomic::{AtomicUsize, Ordering}, Mutex}};

use chrono::{DateTime, Utc};
use trip_tracker_lib::{coordinate::Coordinate, sample::Sample};

/// One raw fix from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(coordinate: Coordinate, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            accuracy_m,
            timestamp,
        }
    }

    pub fn into_sample(self, label: Option<String>) -> Sample {
        Sample::new(self.coordinate, self.accuracy_m, self.timestamp, label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location request timed out")]
    Timeout,

    #[error("position unavailable")]
    PositionUnavailable,
}

/// The device's "get current position" capability.
///
/// Every call resolves exactly once, with a fix or a failure.
#[async_trait::async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<Reading, CapabilityError>;
}

/// Deterministic source that hands out a fixed script of results in order.
///
/// Once the script runs dry every call returns the fallback result
/// (`PositionUnavailable` unless changed with [`ScriptedSource::then_always`]).
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Reading, CapabilityError>>>,
    fallback: Result<Reading, CapabilityError>,
    attempts: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<Reading, CapabilityError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Err(CapabilityError::PositionUnavailable),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn from_readings(readings: impl IntoIterator<Item = Reading>) -> Self {
        Self::new(readings.into_iter().map(Ok))
    }

    pub fn then_always(mut self, result: Result<Reading, CapabilityError>) -> Self {
        self.fallback = result;
        self
    }

    /// Number of position requests served so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[async_trait::async_trait]
impl LocationSource for ScriptedSource {
    async fn current_position(&self) -> Result<Reading, CapabilityError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };

        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn scripted_source_plays_in_order() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let first = Reading::new(Coordinate::new(56., 10.).unwrap(), 30., ts);
        let second = Reading::new(Coordinate::new(56.001, 10.).unwrap(), 8., ts);
        let source = ScriptedSource::new([Ok(first.clone()), Err(CapabilityError::Timeout), Ok(second.clone())]);

        assert_eq!(source.remaining(), 3);
        assert_eq!(source.current_position().await, Ok(first));
        assert_eq!(source.current_position().await, Err(CapabilityError::Timeout));
        assert_eq!(source.current_position().await, Ok(second.clone()));
        assert!(source.is_exhausted());
        assert_eq!(source.current_position().await, Err(CapabilityError::PositionUnavailable));
        assert_eq!(source.attempts(), 4);

        let repeating = ScriptedSource::new([]).then_always(Ok(second.clone()));
        assert_eq!(repeating.current_position().await, Ok(second.clone()));
        assert_eq!(repeating.current_position().await, Ok(second));
    }
}
