use std::{sync::Arc, time::Duration};

use tokio::{sync::{broadcast, Mutex}, task::JoinHandle, time::{Instant, MissedTickBehavior}};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trip_tracker_lib::{coordinate::Coordinate, trip::TripRecord};

use crate::{
    events::TrackerEvent,
    geonames::{resolve_label, PlaceLookup},
    location::{CapabilityError, LocationSource},
    sampler::{acquire_accurate_position, AccuracyGate},
    session::{Assessment, Rejection, SampleOutcome, TripSession, TripState},
    Precondition, TrackerConfig, TrackerError, UnavailableReason,
};

const EVENT_CAPACITY: usize = 100;

/// The public interface for running trips.
///
/// Owns the single [`TripSession`] and the timer task that feeds it while
/// tracking. User actions map one-to-one onto methods here; everything the map
/// layer needs to draw is pushed through [`TripController::subscribe`].
pub struct TripController {
    session: Arc<Mutex<TripSession>>,
    source: Arc<dyn LocationSource>,
    lookup: Arc<dyn PlaceLookup>,
    config: TrackerConfig,
    events: broadcast::Sender<TrackerEvent>,
    tracking: Option<TrackingHandle>,

    /// Held for the whole of every acquisition, capture or tick alike.
    acquisition: Arc<Mutex<()>>,
}

struct TrackingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TripController {
    pub fn new(source: Arc<dyn LocationSource>, lookup: Arc<dyn PlaceLookup>, config: TrackerConfig) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);

        Self {
            session: Arc::new(Mutex::new(TripSession::from_config(&config))),
            source,
            lookup,
            config,
            events,
            tracking: None,
            acquisition: Arc::new(Mutex::new(())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub async fn state(&self) -> TripState {
        self.session.lock().await.state()
    }

    pub async fn total_distance_m(&self) -> f64 {
        self.session.lock().await.total_distance_m()
    }

    pub async fn midpoint(&self) -> Option<Coordinate> {
        self.session.lock().await.midpoint()
    }

    pub async fn last_position(&self) -> Option<Coordinate> {
        self.session.lock().await.last_position()
    }

    /// The last stopped or halted trip, available until the next start.
    pub async fn record(&self) -> Option<TripRecord> {
        self.session.lock().await.record().cloned()
    }

    pub async fn set_name(&self, name: &str) -> Result<(), TrackerError> {
        self.session.lock().await.set_name(name)
    }

    /// Pins the midpoint to the next fix that passes the strict midpoint gate.
    ///
    /// On failure the session stays in `MidpointPending` and the caller may retry.
    /// If the midpoint was anchored while the fix was pending, the fix is dropped
    /// and the anchored midpoint is returned.
    pub async fn capture_midpoint(&self) -> Result<Coordinate, TrackerError> {
        self.session.lock().await.begin_midpoint_capture()?;

        let result = {
            let _acquiring = self.acquisition.lock().await;
            acquire_accurate_position(self.source.as_ref(), &self.config.midpoint_gate()).await
        };
        let reading = match result {
            Ok(reading) => reading,
            Err(err) => {
                warn!("Midpoint capture failed: {}", err);
                return Err(err);
            }
        };

        let mut session = self.session.lock().await;
        match session.midpoint_captured(reading.coordinate) {
            Ok(()) => {
                drop(session);
                self.emit(TrackerEvent::MidpointSet(reading.coordinate));
                Ok(reading.coordinate)
            }
            Err(TrackerError::StaleResult) => {
                debug!("Midpoint fix arrived after the session moved on, keeping current midpoint");
                session.midpoint().ok_or_else(|| Precondition::MissingMidpoint.into())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn anchor_midpoint(&self, midpoint: Coordinate) -> Result<(), TrackerError> {
        self.session.lock().await.anchor_midpoint(midpoint)?;
        self.emit(TrackerEvent::MidpointSet(midpoint));
        Ok(())
    }

    /// Replaces the midpoint mid-trip, starting a new segment.
    pub async fn reanchor(&self, midpoint: Coordinate) -> Result<(), TrackerError> {
        self.session.lock().await.reanchor(midpoint)?;
        self.emit(TrackerEvent::MidpointSet(midpoint));
        Ok(())
    }

    pub async fn start(&mut self) -> Result<u64, TrackerError> {
        let (run_id, name) = {
            let mut session = self.session.lock().await;
            let run_id = session.start()?;
            (run_id, session.name().unwrap_or_default().to_owned())
        };

        // Whatever the previous run still has in flight is stale now
        if let Some(previous) = self.tracking.take() {
            previous.cancel.cancel();
            previous.task.abort();
            if let Err(err) = previous.task.await {
                if !err.is_cancelled() {
                    error!("Tracking task failed: {}", err);
                }
            }
        }

        let cancel = CancellationToken::new();
        let run = TrackingRun {
            run_id,
            session: self.session.clone(),
            source: self.source.clone(),
            lookup: self.lookup.clone(),
            gate: self.config.tracking_gate(),
            period: self.config.sample_interval,
            events: self.events.clone(),
            acquisition: self.acquisition.clone(),
        };
        let task = tokio::spawn(run.run(cancel.clone()));

        self.tracking = Some(TrackingHandle { cancel, task });

        info!("Tracking '{}' every {:?}", name, self.config.sample_interval);
        self.emit(TrackerEvent::TrackingStarted { name, run_id });
        Ok(run_id)
    }

    /// Cancels the timer and freezes the trip.
    ///
    /// An acquisition already in flight is left to finish and its result is dropped.
    pub async fn stop(&mut self) -> Result<TripRecord, TrackerError> {
        let record = self.session.lock().await.stop()?;

        if let Some(tracking) = &self.tracking {
            tracking.cancel.cancel();
        }

        self.emit(TrackerEvent::TrackingStopped(record.clone()));
        Ok(record)
    }

    /// Waits for the current tracking task, including any in-flight acquisition, to finish.
    pub async fn join_tracking(&mut self) {
        if let Some(tracking) = self.tracking.take() {
            if let Err(err) = tracking.task.await {
                error!("Tracking task failed: {}", err);
            }
        }
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for TripController {
    fn drop(&mut self) {
        if let Some(tracking) = &self.tracking {
            tracking.cancel.cancel();
        }
    }
}

/// One tracking run: a timer loop bound to a single run id.
struct TrackingRun {
    run_id: u64,
    session: Arc<Mutex<TripSession>>,
    source: Arc<dyn LocationSource>,
    lookup: Arc<dyn PlaceLookup>,
    gate: AccuracyGate,
    period: Duration,
    events: broadcast::Sender<TrackerEvent>,
    acquisition: Arc<Mutex<()>>,
}

impl TrackingRun {
    async fn run(self, cancel: CancellationToken) {
        // First sample one period after start
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Tracking run {} cancelled", self.run_id);
                    break;
                }

                _ = ticker.tick() => {}
            }

            // Ticks never overlap: the next one is awaited only after this completes
            if !self.tick().await {
                break;
            }
        }

        debug!("Tracking run {} finished", self.run_id);
    }

    /// Samples once. Returns false when the run is over.
    async fn tick(&self) -> bool {
        let result = {
            let _acquiring = self.acquisition.lock().await;
            acquire_accurate_position(self.source.as_ref(), &self.gate).await
        };
        let reading = match result {
            Ok(reading) => reading,
            Err(TrackerError::LocationUnavailable { reason: reason @ UnavailableReason::Capability(CapabilityError::PermissionDenied), .. }) => {
                self.halt(reason).await;
                return false;
            }
            Err(TrackerError::LocationUnavailable { reason, last_accuracy_m, .. }) => {
                warn!("Skipping sample: {}", reason);
                self.emit(TrackerEvent::AttemptFailed { reason, last_accuracy_m });
                return true;
            }
            Err(err) => {
                warn!("Skipping sample: {}", err);
                return true;
            }
        };

        let assessment = self.session.lock().await.assess(self.run_id, &reading);
        let accept = match assessment {
            Ok(Assessment::Accept { .. }) => true,
            Ok(Assessment::Reject(_)) => false,
            Err(TrackerError::StaleResult) => {
                self.discard();
                return false;
            }
            Err(err) => {
                warn!("Skipping sample: {}", err);
                return true;
            }
        };

        // Only accepted samples are worth a lookup
        let label = if accept {
            resolve_label(self.lookup.as_ref(), reading.coordinate).await
        } else {
            None
        };

        // The session may have moved on during the lookup; offer re-checks.
        let coordinate = reading.coordinate;
        let outcome = self.session.lock().await.offer(self.run_id, reading, label);

        match outcome {
            Ok(SampleOutcome::Accepted { sample, total_m, .. }) => {
                self.emit(TrackerEvent::PositionUpdated(coordinate));
                self.emit(TrackerEvent::SampleAccepted { sample, total_distance_m: total_m });
            }
            Ok(SampleOutcome::Rejected(rejection)) => {
                debug!("Reading rejected: {:?}", rejection);
                if !matches!(rejection, Rejection::TooInaccurate { .. }) {
                    self.emit(TrackerEvent::PositionUpdated(coordinate));
                }
                self.emit(TrackerEvent::SampleRejected(rejection));
            }
            Err(TrackerError::StaleResult) => {
                self.discard();
                return false;
            }
            Err(err) => warn!("Skipping sample: {}", err),
        }

        true
    }

    async fn halt(&self, reason: UnavailableReason) {
        let halted = self.session.lock().await.halt(self.run_id);
        match halted {
            Ok(record) => {
                error!("Tracking run {} halted: {}", self.run_id, reason);
                self.emit(TrackerEvent::TrackingHalted { reason, record });
            }
            Err(_) => self.discard(),
        }
    }

    fn discard(&self) {
        debug!("Discarding result for finished tracking run {}", self.run_id);
        self.emit(TrackerEvent::Discarded { run_id: self.run_id });
    }

    fn emit(&self, event: TrackerEvent) {
        let _ = self.events.send(event);
    }
}
