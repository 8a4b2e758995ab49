//! Accuracy-gated position acquisition.
//!
//! A fresh GPS fix is usually poor and tightens over a few seconds, so a
//! reading is only used once its accuracy radius is inside the gate. The
//! retry loop is always bounded, by attempts, by elapsed time, or both.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{location::{CapabilityError, LocationSource, Reading}, TrackerError, UnavailableReason};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyGate {
    /// Largest acceptable accuracy radius. Must be positive: a gate of 0 m can never be met.
    pub max_accuracy_m: f64,
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<Duration>,
    pub retry_delay: Duration,
}

impl AccuracyGate {
    pub fn with_attempts(max_accuracy_m: f64, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_accuracy_m,
            max_attempts: Some(max_attempts),
            max_elapsed: None,
            retry_delay,
        }
    }

    pub fn with_deadline(max_accuracy_m: f64, max_elapsed: Duration, retry_delay: Duration) -> Self {
        Self {
            max_accuracy_m,
            max_attempts: None,
            max_elapsed: Some(max_elapsed),
            retry_delay,
        }
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if !self.max_accuracy_m.is_finite() || self.max_accuracy_m <= 0. {
            return Err(TrackerError::InvalidGate(format!("max accuracy must be positive, got {} m", self.max_accuracy_m)));
        }

        match (self.max_attempts, self.max_elapsed) {
            (None, None) => Err(TrackerError::InvalidGate("retries must be bounded by attempts or elapsed time".into())),
            (Some(0), _) => Err(TrackerError::InvalidGate("max attempts must be at least 1".into())),
            _ => Ok(()),
        }
    }
}

/// Polls `source` until a reading is within `gate.max_accuracy_m`.
///
/// Fails with [`TrackerError::LocationUnavailable`] as soon as the capability
/// itself fails, or once the gate's attempt or time budget is spent. The error
/// carries the last reported accuracy for display.
pub async fn acquire_accurate_position(source: &dyn LocationSource, gate: &AccuracyGate) -> Result<Reading, TrackerError> {
    gate.validate()?;

    let started = Instant::now();
    let mut attempts = 0;
    let mut last_accuracy_m = None;

    loop {
        attempts += 1;

        let result = match gate.max_elapsed {
            Some(limit) => {
                let remaining = limit.saturating_sub(started.elapsed());
                tokio::time::timeout(remaining, source.current_position())
                    .await
                    .unwrap_or(Err(CapabilityError::Timeout))
            }
            None => source.current_position().await,
        };

        let reading = match result {
            Ok(reading) => reading,
            Err(err) => {
                debug!("Location capability failed on attempt {}: {}", attempts, err);
                return Err(TrackerError::LocationUnavailable {
                    reason: UnavailableReason::Capability(err),
                    attempts,
                    last_accuracy_m,
                });
            }
        };

        if reading.accuracy_m <= gate.max_accuracy_m {
            debug!("Accurate fix after {} attempt(s): {:.1} m", attempts, reading.accuracy_m);
            return Ok(reading);
        }

        trace!("Fix too coarse ({:.1} m > {:.1} m), retrying", reading.accuracy_m, gate.max_accuracy_m);
        last_accuracy_m = Some(reading.accuracy_m);

        let out_of_attempts = gate.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_time = gate.max_elapsed.is_some_and(|limit| started.elapsed() + gate.retry_delay >= limit);
        if out_of_attempts || out_of_time {
            return Err(TrackerError::LocationUnavailable {
                reason: UnavailableReason::AccuracyNotReached,
                attempts,
                last_accuracy_m,
            });
        }

        tokio::time::sleep(gate.retry_delay).await;
    }
}
