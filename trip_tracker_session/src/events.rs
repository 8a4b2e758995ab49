use trip_tracker_lib::{coordinate::Coordinate, sample::Sample, trip::TripRecord};

use crate::{session::Rejection, UnavailableReason};

/// Updates pushed to map/UI observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    MidpointSet(Coordinate),
    TrackingStarted { name: String, run_id: u64 },
    PositionUpdated(Coordinate),
    SampleAccepted { sample: Sample, total_distance_m: f64 },
    SampleRejected(Rejection),
    /// One tick produced no usable fix. Tracking carries on.
    AttemptFailed { reason: UnavailableReason, last_accuracy_m: Option<f64> },
    /// A fix arrived after its run had ended and was dropped.
    Discarded { run_id: u64 },
    TrackingHalted { reason: UnavailableReason, record: TripRecord },
    TrackingStopped(TripRecord),
}
