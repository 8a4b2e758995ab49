use const_format::concatcp;

pub mod configuration;
pub mod controller;
mod error;
pub mod events;
pub mod export;
pub mod geonames;
pub mod gpx_util;
pub mod location;
pub mod sampler;
pub mod session;

pub use configuration::TrackerConfig;
pub use controller::TripController;
pub use error::*;

pub const DATA_DIR: &str = "data/";
pub const EXPORT_DIR: &str = concatcp!(DATA_DIR, "trips");
