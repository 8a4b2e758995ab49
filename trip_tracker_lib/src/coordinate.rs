use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::{distance::distance_meters, TripError};

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, TripError> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);

        if !valid {
            return Err(TripError::InvalidCoordinate { lat, lon });
        }

        Ok(Self { lat, lon })
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance_meters(*self, *other)
    }
}

impl From<Coordinate> for Point {
    fn from(value: Coordinate) -> Self {
        Point::new(value.lon, value.lat)
    }
}

impl TryFrom<Point> for Coordinate {
    type Error = TripError;

    fn try_from(value: Point) -> Result<Self, Self::Error> {
        Coordinate::new(value.y(), value.x())
    }
}
