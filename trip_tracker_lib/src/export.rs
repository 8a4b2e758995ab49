//! The downloadable trip log.
//!
//! The JSON layout is consumed downstream and must stay stable:
//!
//! ```json
//! {
//!   "name": "Morning walk",
//!   "totalDistance": "1.234 km",
//!   "midpoint": { "lat": 56.15, "lon": 10.2 },
//!   "locations": [
//!     { "lat": 56.15, "lon": 10.2, "accuracy": 4.0, "name": "Denmark", "timestamp": "2024-05-01T12:00:00Z" }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{coordinate::Coordinate, sample::Sample, trip::TripRecord, TripError};

/// Label written for samples without a resolved place name.
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

pub const EXPORT_SUFFIX: &str = "_log.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripExport {
    pub name: String,
    pub total_distance: String,
    pub midpoint: Coordinate,
    pub locations: Vec<ExportedLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedLocation {
    pub lat: f64,
    pub lon: f64,
    pub accuracy: f64,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Sample> for ExportedLocation {
    fn from(sample: &Sample) -> Self {
        Self {
            lat: sample.coordinate.lat,
            lon: sample.coordinate.lon,
            accuracy: sample.accuracy_m,
            name: sample.label.clone().unwrap_or_else(|| UNKNOWN_LOCATION.to_owned()),
            timestamp: sample.timestamp,
        }
    }
}

impl TryFrom<ExportedLocation> for Sample {
    type Error = TripError;

    fn try_from(location: ExportedLocation) -> Result<Self, Self::Error> {
        let label = (location.name != UNKNOWN_LOCATION).then_some(location.name);
        Ok(Sample::new(
            Coordinate::new(location.lat, location.lon)?,
            location.accuracy,
            location.timestamp,
            label,
        ))
    }
}

impl From<&TripRecord> for TripExport {
    fn from(record: &TripRecord) -> Self {
        Self {
            name: record.name.clone(),
            total_distance: format!("{:.3} km", record.total_distance_km()),
            midpoint: record.midpoint,
            locations: record.samples.iter().map(ExportedLocation::from).collect(),
        }
    }
}

impl TryFrom<TripExport> for TripRecord {
    type Error = TripError;

    fn try_from(export: TripExport) -> Result<Self, Self::Error> {
        let total_distance_km = parse_distance_km(&export.total_distance)?;
        let midpoint = Coordinate::new(export.midpoint.lat, export.midpoint.lon)?;
        let samples = export
            .locations
            .into_iter()
            .map(Sample::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // Segment boundaries are not part of the export
        Ok(TripRecord::new(export.name, total_distance_km * 1000., midpoint, samples, Vec::new()))
    }
}

fn parse_distance_km(value: &str) -> Result<f64, TripError> {
    let number = value
        .trim()
        .strip_suffix("km")
        .ok_or_else(|| TripError::Export(format!("totalDistance must end in 'km', got {value:?}")))?;

    number
        .trim()
        .parse::<f64>()
        .map_err(|_| TripError::Export(format!("totalDistance is not a number: {value:?}")))
}

impl TripRecord {
    pub fn to_json(&self) -> Result<String, TripError> {
        Ok(serde_json::to_string_pretty(&TripExport::from(self))?)
    }

    pub fn from_json(json: &str) -> Result<Self, TripError> {
        let export: TripExport = serde_json::from_str(json)?;
        TripRecord::try_from(export)
    }

    /// `<name>_log.json`, with path separators and control characters replaced.
    pub fn export_file_name(&self) -> String {
        let stem: String = self
            .name
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();

        let stem = if stem.is_empty() { "trip".to_owned() } else { stem };
        format!("{stem}{EXPORT_SUFFIX}")
    }
}
