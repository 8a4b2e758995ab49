use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;

/// One accepted location reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
    pub label: Option<String>,
}

impl Sample {
    pub fn new(coordinate: Coordinate, accuracy_m: f64, timestamp: DateTime<Utc>, label: Option<String>) -> Self {
        Self {
            coordinate,
            accuracy_m,
            timestamp,
            label,
        }
    }
}
