//! The trip session state machine.
//!
//! `Idle -> MidpointPending -> Armed -> Tracking -> Stopped`
//!
//! Distance is accumulated sequentially: each reading is measured against the
//! distance reference, which is the previously accepted sample, or the
//! midpoint at the start of a run and right after a re-anchor. A reading that
//! moved less than the minimum movement is dropped and leaves the reference
//! where it was, so slow drift still adds up once it crosses the threshold.

use std::fmt;

use tracing::{debug, info};
use trip_tracker_lib::{coordinate::Coordinate, sample::Sample, trip::TripRecord};

use crate::{location::Reading, Precondition, TrackerConfig, TrackerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripState {
    Idle,
    MidpointPending,
    Armed,
    Tracking,
    Stopped,
}

impl fmt::Display for TripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TripState::Idle => "idle",
            TripState::MidpointPending => "waiting for a midpoint",
            TripState::Armed => "armed",
            TripState::Tracking => "tracking",
            TripState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the session would do with a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assessment {
    Accept { movement_m: f64 },
    Reject(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooInaccurate { accuracy_m: f64 },
    OutOfOrder,
    BelowMovement { movement_m: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Accepted { sample: Sample, increment_m: f64, total_m: f64 },
    Rejected(Rejection),
}

#[derive(Debug)]
pub struct TripSession {
    state: TripState,
    name: Option<String>,
    midpoint: Option<Coordinate>,

    /// Where the next movement is measured from.
    reference: Option<Coordinate>,
    last_position: Option<Coordinate>,

    total_distance_m: f64,
    samples: Vec<Sample>,
    segment_starts: Vec<usize>,

    run_id: u64,
    record: Option<TripRecord>,

    min_movement_m: f64,
    max_accuracy_m: f64,
}

impl TripSession {
    pub fn new(min_movement_m: f64, max_accuracy_m: f64) -> Self {
        Self {
            state: TripState::Idle,
            name: None,
            midpoint: None,
            reference: None,
            last_position: None,
            total_distance_m: 0.,
            samples: Vec::new(),
            segment_starts: Vec::new(),
            run_id: 0,
            record: None,
            min_movement_m,
            max_accuracy_m,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.min_movement_m, config.tracking_accuracy_m)
    }

    pub fn state(&self) -> TripState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn midpoint(&self) -> Option<Coordinate> {
        self.midpoint
    }

    pub fn last_position(&self) -> Option<Coordinate> {
        self.last_position
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// The record frozen by the last stop or halt. Cleared by the next start.
    pub fn record(&self) -> Option<&TripRecord> {
        self.record.as_ref()
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), TrackerError> {
        self.require_not_tracking("rename the trip")?;
        self.name = Some(name.trim().to_owned());
        Ok(())
    }

    pub fn begin_midpoint_capture(&mut self) -> Result<(), TrackerError> {
        self.require_not_tracking("capture a midpoint")?;
        self.midpoint = None;
        self.state = TripState::MidpointPending;
        Ok(())
    }

    /// Completes a capture started by [`TripSession::begin_midpoint_capture`].
    ///
    /// Returns [`TrackerError::StaleResult`] if the session moved on meanwhile.
    pub fn midpoint_captured(&mut self, midpoint: Coordinate) -> Result<(), TrackerError> {
        if self.state != TripState::MidpointPending {
            debug!("Dropping midpoint fix, session is {}", self.state);
            return Err(TrackerError::StaleResult);
        }
        self.arm(midpoint);
        Ok(())
    }

    /// Sets the midpoint directly, e.g. from a map tap.
    pub fn anchor_midpoint(&mut self, midpoint: Coordinate) -> Result<(), TrackerError> {
        self.require_not_tracking("anchor a midpoint")?;
        self.arm(midpoint);
        Ok(())
    }

    fn arm(&mut self, midpoint: Coordinate) {
        info!("Midpoint set at {}, {}", midpoint.lat, midpoint.lon);
        self.midpoint = Some(midpoint);
        self.state = TripState::Armed;
    }

    /// Begins a new tracking run and returns its id.
    ///
    /// The previous run's samples and record are discarded here.
    pub fn start(&mut self) -> Result<u64, TrackerError> {
        let Some(midpoint) = self.midpoint else {
            return Err(Precondition::MissingMidpoint.into());
        };
        if self.name.as_deref().is_none_or(str::is_empty) {
            return Err(Precondition::MissingName.into());
        }
        if self.state != TripState::Armed {
            return Err(Precondition::InvalidState { action: "start tracking", state: self.state }.into());
        }

        self.run_id += 1;
        self.state = TripState::Tracking;
        self.reference = Some(midpoint);
        self.total_distance_m = 0.;
        self.samples.clear();
        self.segment_starts.clear();
        self.record = None;

        info!("Tracking run {} started", self.run_id);
        Ok(self.run_id)
    }

    pub fn assess(&self, run_id: u64, reading: &Reading) -> Result<Assessment, TrackerError> {
        if self.state != TripState::Tracking || run_id != self.run_id {
            return Err(TrackerError::StaleResult);
        }

        if !(reading.accuracy_m <= self.max_accuracy_m) {
            return Ok(Assessment::Reject(Rejection::TooInaccurate { accuracy_m: reading.accuracy_m }));
        }

        if self.samples.last().is_some_and(|last| reading.timestamp < last.timestamp) {
            return Ok(Assessment::Reject(Rejection::OutOfOrder));
        }

        let movement_m = match self.reference {
            Some(reference) => reference.distance_to(&reading.coordinate),
            None => 0.,
        };

        if movement_m < self.min_movement_m {
            return Ok(Assessment::Reject(Rejection::BelowMovement { movement_m }));
        }

        Ok(Assessment::Accept { movement_m })
    }

    /// Applies a reading to the running trip.
    pub fn offer(&mut self, run_id: u64, reading: Reading, label: Option<String>) -> Result<SampleOutcome, TrackerError> {
        let assessment = self.assess(run_id, &reading)?;

        if !matches!(assessment, Assessment::Reject(Rejection::TooInaccurate { .. })) {
            self.last_position = Some(reading.coordinate);
        }

        match assessment {
            Assessment::Reject(rejection) => Ok(SampleOutcome::Rejected(rejection)),
            Assessment::Accept { movement_m } => {
                let sample = reading.into_sample(label);

                self.reference = Some(sample.coordinate);
                self.total_distance_m += movement_m;
                self.samples.push(sample.clone());

                Ok(SampleOutcome::Accepted {
                    sample,
                    increment_m: movement_m,
                    total_m: self.total_distance_m,
                })
            }
        }
    }

    /// Moves the midpoint and opens a new segment.
    ///
    /// Samples and distance already accumulated are kept.
    pub fn reanchor(&mut self, midpoint: Coordinate) -> Result<(), TrackerError> {
        match self.state {
            TripState::Armed => {
                self.midpoint = Some(midpoint);
            }
            TripState::Tracking => {
                self.midpoint = Some(midpoint);
                self.reference = Some(midpoint);
                self.segment_starts.push(self.samples.len());
            }
            state => return Err(Precondition::InvalidState { action: "re-anchor", state }.into()),
        }

        info!("Re-anchored midpoint to {}, {}", midpoint.lat, midpoint.lon);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<TripRecord, TrackerError> {
        if self.state != TripState::Tracking {
            return Err(Precondition::InvalidState { action: "stop", state: self.state }.into());
        }
        Ok(self.freeze())
    }

    /// Stops the given run after an unrecoverable capability failure.
    pub fn halt(&mut self, run_id: u64) -> Result<TripRecord, TrackerError> {
        if self.state != TripState::Tracking || run_id != self.run_id {
            return Err(TrackerError::StaleResult);
        }
        Ok(self.freeze())
    }

    fn freeze(&mut self) -> TripRecord {
        self.state = TripState::Stopped;

        let record = TripRecord::new(
            self.name.clone().unwrap_or_default(),
            self.total_distance_m,
            self.midpoint.unwrap_or(Coordinate { lat: 0., lon: 0. }),
            self.samples.clone(),
            self.segment_starts.clone(),
        );

        info!(
            "Tracking run {} stopped: {:.3} km over {} samples",
            self.run_id,
            record.total_distance_km(),
            record.samples.len()
        );

        self.record = Some(record.clone());
        record
    }

    fn require_not_tracking(&self, action: &'static str) -> Result<(), TrackerError> {
        if self.state == TripState::Tracking {
            return Err(Precondition::InvalidState { action, state: self.state }.into());
        }
        Ok(())
    }
}
