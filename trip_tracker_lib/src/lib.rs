pub mod coordinate;
pub mod distance;
pub mod export;
pub mod sample;
pub mod trip;

#[derive(Debug, thiserror::Error)]
pub enum TripError {
    #[error("Coordinate out of range: lat {lat}, lon {lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Malformed trip export: {0}")]
    Export(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
