use std::sync::{atomic::{AtomicUsize, Ordering}, Arc};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::{broadcast, Notify};
use trip_tracker_lib::{coordinate::Coordinate, distance::EARTH_RADIUS_M, trip::TripRecord};
use trip_tracker_session::{
    events::TrackerEvent,
    geonames::NoLookup,
    location::{CapabilityError, LocationSource, Reading, ScriptedSource},
    session::{Rejection, TripState},
    Precondition, TrackerConfig, TrackerError, TripController, UnavailableReason,
};

fn midpoint() -> Coordinate {
    Coordinate::new(56.15, 10.2).unwrap()
}

fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
    Coordinate::new(origin.lat + (meters / EARTH_RADIUS_M).to_degrees(), origin.lon).unwrap()
}

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(seconds)
}

fn reading(meters_north: f64, accuracy_m: f64, seconds: i64) -> Reading {
    Reading::new(north_of(midpoint(), meters_north), accuracy_m, at(seconds))
}

fn controller(source: Arc<dyn LocationSource>, config: TrackerConfig) -> TripController {
    TripController::new(source, Arc::new(NoLookup), config)
}

/// Waits for the next event that ends a tick.
async fn next_outcome(events: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    loop {
        let event = events.recv().await.unwrap();
        if matches!(
            event,
            TrackerEvent::SampleAccepted { .. }
                | TrackerEvent::SampleRejected(_)
                | TrackerEvent::AttemptFailed { .. }
                | TrackerEvent::TrackingHalted { .. }
        ) {
            return event;
        }
    }
}

fn drain(events: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn full_trip_lifecycle() {
    let source = Arc::new(ScriptedSource::from_readings([
        // Midpoint capture: one coarse fix, then a good one
        reading(0., 40., 0),
        reading(0., 6., 1),
        // Tracking
        reading(0., 5., 10),
        reading(40., 5., 20),
        reading(60., 5., 30),
        reading(130., 5., 40),
    ]));
    let config = TrackerConfig { min_movement_m: 50., ..Default::default() };
    let mut controller = controller(source.clone(), config);
    let mut events = controller.subscribe();

    controller.set_name("Harbour run").await.unwrap();
    let captured = controller.capture_midpoint().await.unwrap();
    assert_eq!(captured, midpoint());
    assert_eq!(controller.state().await, TripState::Armed);
    assert_eq!(events.recv().await.unwrap(), TrackerEvent::MidpointSet(midpoint()));

    let run_id = controller.start().await.unwrap();
    assert_eq!(controller.state().await, TripState::Tracking);

    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleRejected(Rejection::BelowMovement { .. })));
    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleRejected(Rejection::BelowMovement { .. })));
    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleAccepted { .. }));
    match next_outcome(&mut events).await {
        TrackerEvent::SampleAccepted { sample, total_distance_m } => {
            assert_eq!(sample.coordinate, north_of(midpoint(), 130.));
            assert!((total_distance_m - 130.).abs() < 0.01);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(source.is_exhausted());

    let record = controller.stop().await.unwrap();
    controller.join_tracking().await;

    assert_eq!(controller.state().await, TripState::Stopped);
    assert_eq!(record.name, "Harbour run");
    assert_eq!(record.midpoint, midpoint());
    assert_eq!(record.samples.len(), 2);
    assert!((record.total_distance_m - 130.).abs() < 0.01);
    assert_eq!(controller.record().await, Some(record.clone()));
    assert_eq!(controller.last_position().await, Some(north_of(midpoint(), 130.)));

    let stopped = drain(&mut events);
    assert!(stopped.contains(&TrackerEvent::TrackingStopped(record.clone())));
    assert!(!stopped.contains(&TrackerEvent::Discarded { run_id }));

    // Without a lookup the samples stay unlabelled, in memory and after a round trip
    assert!(record.samples.iter().all(|sample| sample.label.is_none()));
    let parsed = TripRecord::from_json(&record.to_json().unwrap()).unwrap();
    assert_eq!(parsed.samples, record.samples);
}

#[tokio::test(start_paused = true)]
async fn start_requires_midpoint_then_name() {
    let source = Arc::new(ScriptedSource::new([]));
    let mut controller = controller(source.clone(), TrackerConfig::default());

    controller.set_name("Harbour run").await.unwrap();
    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, TrackerError::PreconditionNotMet(Precondition::MissingMidpoint)));
    assert_eq!(controller.state().await, TripState::Idle);

    let mut unnamed = self::controller(source.clone(), TrackerConfig::default());
    unnamed.anchor_midpoint(midpoint()).await.unwrap();
    let err = unnamed.start().await.unwrap_err();
    assert!(matches!(err, TrackerError::PreconditionNotMet(Precondition::MissingName)));
    assert_eq!(unnamed.state().await, TripState::Armed);

    unnamed.set_name("   ").await.unwrap();
    assert!(matches!(unnamed.start().await, Err(TrackerError::PreconditionNotMet(Precondition::MissingName))));

    assert_eq!(source.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_midpoint_capture_can_be_retried() {
    let source = Arc::new(ScriptedSource::new([Err(CapabilityError::Timeout), Ok(reading(0., 3., 0))]));
    let controller = controller(source, TrackerConfig::default());

    let err = controller.capture_midpoint().await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::LocationUnavailable { reason: UnavailableReason::Capability(CapabilityError::Timeout), .. }
    ));
    assert_eq!(controller.state().await, TripState::MidpointPending);

    assert_eq!(controller.capture_midpoint().await.unwrap(), midpoint());
    assert_eq!(controller.state().await, TripState::Armed);
}

/// Blocks inside `current_position` until released, counting overlapping calls.
struct GatedSource {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedSource {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count even when the call is dropped mid-await.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl LocationSource for GatedSource {
    async fn current_position(&self) -> Result<Reading, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        self.entered.notify_one();
        self.release.notified().await;
        Ok(reading(100., 5., 10))
    }
}

#[tokio::test(start_paused = true)]
async fn fix_arriving_after_stop_is_discarded() {
    let source = Arc::new(GatedSource::new());
    let mut controller = controller(source.clone(), TrackerConfig::default());
    let mut events = controller.subscribe();

    controller.set_name("Harbour run").await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    let run_id = controller.start().await.unwrap();

    source.entered.notified().await;
    let record = controller.stop().await.unwrap();
    source.release.notify_one();
    controller.join_tracking().await;

    assert!(drain(&mut events).contains(&TrackerEvent::Discarded { run_id }));
    assert_eq!(controller.total_distance_m().await, 0.);
    assert!(record.samples.is_empty());
    assert_eq!(controller.record().await, Some(record));
    assert_eq!(controller.state().await, TripState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_halts_tracking() {
    let source = Arc::new(ScriptedSource::new([Ok(reading(100., 5., 10)), Err(CapabilityError::PermissionDenied)]));
    let mut controller = controller(source, TrackerConfig::default());
    let mut events = controller.subscribe();

    controller.set_name("Harbour run").await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    controller.start().await.unwrap();

    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleAccepted { .. }));
    match next_outcome(&mut events).await {
        TrackerEvent::TrackingHalted { reason, record } => {
            assert_eq!(reason, UnavailableReason::Capability(CapabilityError::PermissionDenied));
            assert_eq!(record.samples.len(), 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    controller.join_tracking().await;

    assert_eq!(controller.state().await, TripState::Stopped);
    assert!(controller.record().await.is_some());
    assert!(controller.stop().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_tick_does_not_stop_tracking() {
    let source = Arc::new(ScriptedSource::new([Err(CapabilityError::Timeout), Ok(reading(100., 5., 20))]));
    let mut controller = controller(source, TrackerConfig::default());
    let mut events = controller.subscribe();

    controller.set_name("Harbour run").await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    controller.start().await.unwrap();

    assert_eq!(
        next_outcome(&mut events).await,
        TrackerEvent::AttemptFailed {
            reason: UnavailableReason::Capability(CapabilityError::Timeout),
            last_accuracy_m: None,
        }
    );
    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleAccepted { .. }));
    assert_eq!(controller.state().await, TripState::Tracking);

    controller.stop().await.unwrap();
    controller.join_tracking().await;
}

#[tokio::test(start_paused = true)]
async fn reanchor_opens_new_segment() {
    let source = Arc::new(ScriptedSource::from_readings([reading(100., 5., 10), reading(1060., 5., 20)]));
    let mut controller = controller(source, TrackerConfig::default());
    let mut events = controller.subscribe();

    controller.set_name("Two harbours").await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    controller.start().await.unwrap();

    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleAccepted { .. }));
    let second_anchor = north_of(midpoint(), 1000.);
    controller.reanchor(second_anchor).await.unwrap();
    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleAccepted { .. }));

    let record = controller.stop().await.unwrap();
    controller.join_tracking().await;

    assert!((record.total_distance_m - 160.).abs() < 0.01);
    assert_eq!(record.midpoint, second_anchor);
    assert_eq!(record.samples.len(), 2);
    assert_eq!(record.segments().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn anchor_during_capture_wins() {
    let source = Arc::new(GatedSource::new());
    let controller = controller(source.clone(), TrackerConfig::default());
    let mut events = controller.subscribe();
    let anchored = north_of(midpoint(), 500.);

    let (captured, _) = tokio::join!(controller.capture_midpoint(), async {
        source.entered.notified().await;
        controller.anchor_midpoint(anchored).await.unwrap();
        source.release.notify_one();
    });

    assert_eq!(captured.unwrap(), anchored);
    assert_eq!(controller.midpoint().await, Some(anchored));
    assert_eq!(controller.state().await, TripState::Armed);
    assert_eq!(drain(&mut events), vec![TrackerEvent::MidpointSet(anchored)]);
}

#[tokio::test(start_paused = true)]
async fn restart_does_not_overlap_previous_acquisition() {
    let source = Arc::new(GatedSource::new());
    let mut controller = controller(source.clone(), TrackerConfig::default());

    controller.set_name("Harbour run").await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    controller.start().await.unwrap();
    source.entered.notified().await;

    // First run is still waiting on its fix
    controller.stop().await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(source.in_flight(), 0);

    source.entered.notified().await;
    assert_eq!(source.calls(), 2);
    assert_eq!(source.in_flight(), 1);
    assert_eq!(source.peak(), 1);

    controller.stop().await.unwrap();
    source.release.notify_one();
    controller.join_tracking().await;
}

#[tokio::test(start_paused = true)]
async fn slow_fix_skips_missed_ticks() {
    let source = Arc::new(GatedSource::new());
    let mut controller = controller(source.clone(), TrackerConfig::default());
    let mut events = controller.subscribe();
    let interval = controller.config().sample_interval;

    controller.set_name("Harbour run").await.unwrap();
    controller.anchor_midpoint(midpoint()).await.unwrap();
    controller.start().await.unwrap();
    source.entered.notified().await;

    // Hold the first fix across several intervals
    tokio::time::sleep(interval * 5 + interval / 2).await;
    assert_eq!(source.calls(), 1);
    assert_eq!(source.in_flight(), 1);

    source.release.notify_one();
    assert!(matches!(next_outcome(&mut events).await, TrackerEvent::SampleAccepted { .. }));

    // At most one catch-up tick, not one per missed interval
    tokio::time::sleep(interval / 4).await;
    assert!(source.calls() <= 2, "burst of {} calls after a slow fix", source.calls());
    assert_eq!(source.peak(), 1);

    controller.stop().await.unwrap();
    if source.in_flight() > 0 {
        source.release.notify_one();
    }
    controller.join_tracking().await;
    assert_eq!(source.peak(), 1);
}
