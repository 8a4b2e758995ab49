use std::{fs::File, io::{BufReader, BufWriter}, path::Path};

use chrono::{DateTime, Utc};
use gpx::{Gpx, GpxVersion, Metadata, Track, TrackSegment, Waypoint};
use time::OffsetDateTime;
use tracing::warn;
use trip_tracker_lib::{coordinate::Coordinate, trip::TripRecord};

use crate::{location::{Reading, ScriptedSource}, TrackerError};

/// Converts HDOP into an accuracy radius, assuming a typical 5 m range error.
const HDOP_TO_METERS: f64 = 5.;

/// Reads every timed track point of a GPX file as a location reading.
///
/// Points without a timestamp or with out-of-range coordinates are skipped.
pub fn read_gpx_readings(path: &Path, default_accuracy_m: f64) -> Result<Vec<Reading>, TrackerError> {
    let file = File::open(path)?;
    let gpx = gpx::read(BufReader::new(file))?;

    let mut readings = Vec::new();
    let mut skipped = 0;

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let Some(timestamp) = point.time.and_then(|time| from_gpx_time(time.into())) else {
                    skipped += 1;
                    continue;
                };
                let Ok(coordinate) = Coordinate::try_from(point.point()) else {
                    skipped += 1;
                    continue;
                };
                let accuracy_m = point.hdop.map_or(default_accuracy_m, |hdop| hdop * HDOP_TO_METERS);

                readings.push(Reading::new(coordinate, accuracy_m, timestamp));
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} unusable points in {:?}", skipped, path);
    }

    Ok(readings)
}

/// A source that plays back a recorded GPX track one point per request.
pub fn replay_source(path: &Path, default_accuracy_m: f64) -> Result<ScriptedSource, TrackerError> {
    Ok(ScriptedSource::from_readings(read_gpx_readings(path, default_accuracy_m)?))
}

/// One track with a segment per re-anchored stretch, plus the midpoint as a waypoint.
pub fn record_to_gpx(record: &TripRecord) -> Result<Gpx, TrackerError> {
    let mut track = Track::new();
    track.name = Some(record.name.clone());

    for samples in record.segments() {
        let mut segment = TrackSegment::new();
        for sample in samples {
            let mut waypoint = Waypoint::new(sample.coordinate.into());
            waypoint.time = Some(to_gpx_time(sample.timestamp)?.into());
            waypoint.name = sample.label.clone();
            waypoint.comment = Some(format!("accuracy {:.1} m", sample.accuracy_m));
            segment.points.push(waypoint);
        }
        track.segments.push(segment);
    }

    let mut midpoint = Waypoint::new(record.midpoint.into());
    midpoint.name = Some("Midpoint".into());

    Ok(Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("trip_tracker".into()),
        metadata: Some(Metadata {
            name: Some(record.name.clone()),
            ..Default::default()
        }),
        waypoints: vec![midpoint],
        tracks: vec![track],
        ..Default::default()
    })
}

pub fn write_gpx(record: &TripRecord, path: &Path) -> Result<(), TrackerError> {
    let gpx = record_to_gpx(record)?;
    let file = File::create(path)?;
    gpx::write(&gpx, BufWriter::new(file))?;
    Ok(())
}

fn to_gpx_time(timestamp: DateTime<Utc>) -> Result<OffsetDateTime, TrackerError> {
    let nanos = timestamp.timestamp_nanos_opt().ok_or(TrackerError::GpxTimestamp { timestamp })?;

    OffsetDateTime::from_unix_timestamp_nanos(nanos as i128).map_err(|_| TrackerError::GpxTimestamp { timestamp })
}

fn from_gpx_time(time: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.unix_timestamp(), time.nanosecond())
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeDelta, TimeZone};
    use trip_tracker_lib::sample::Sample;

    use super::*;

    fn record() -> TripRecord {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let samples = (0..4)
            .map(|i| {
                let coordinate = Coordinate::new(56.15 + i as f64 * 0.001, 10.2).unwrap();
                Sample::new(coordinate, 4., start + TimeDelta::seconds(i * 10), Some("Denmark".into()))
            })
            .collect();
        TripRecord::new("Harbour run".into(), 333.6, Coordinate::new(56.15, 10.2).unwrap(), samples, vec![2])
    }

    #[test]
    fn one_segment_per_reanchor() {
        let gpx = record_to_gpx(&record()).unwrap();

        assert_eq!(gpx.tracks.len(), 1);
        assert_eq!(gpx.tracks[0].segments.len(), 2);
        assert_eq!(gpx.tracks[0].segments[1].points.len(), 2);
        assert_eq!(gpx.waypoints[0].name.as_deref(), Some("Midpoint"));
    }

    #[test]
    fn written_track_replays() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("harbour.gpx");
        let record = record();

        write_gpx(&record, &path).unwrap();
        let readings = read_gpx_readings(&path, 7.).unwrap();

        assert_eq!(readings.len(), record.samples.len());
        for (reading, sample) in readings.iter().zip(&record.samples) {
            assert!((reading.coordinate.lat - sample.coordinate.lat).abs() < 1e-9);
            assert!((reading.coordinate.lon - sample.coordinate.lon).abs() < 1e-9);
            assert_eq!(reading.timestamp, sample.timestamp);
            assert_eq!(reading.accuracy_m, 7.);
        }
    }

    #[test]
    fn unrepresentable_time_is_gpx_error() {
        let mut record = record();
        record.samples[1].timestamp = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();

        let err = record_to_gpx(&record).unwrap_err();
        assert!(matches!(err, TrackerError::GpxTimestamp { timestamp } if timestamp.year() == 2300));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(read_gpx_readings(&dir.path().join("none.gpx"), 5.), Err(TrackerError::Io(_))));
    }
}
