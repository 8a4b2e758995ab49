use std::{collections::HashMap, fs::File, io::BufReader, path::Path, sync::Mutex};

use celes::Country;
use geo::{point, Contains, Geometry};
use geojson::{FeatureCollection, GeoJson};
use tracing::{debug, warn};
use trip_tracker_lib::coordinate::Coordinate;

use crate::TrackerError;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("No place found at {lat}, {lon}")]
    NotFound { lat: f64, lon: f64 },

    #[error("Place lookup unavailable: {0}")]
    Unavailable(String),
}

/// Reverse geocoding: coordinate to a human readable place name.
#[async_trait::async_trait]
pub trait PlaceLookup: Send + Sync {
    async fn lookup(&self, coordinate: Coordinate) -> Result<String, LookupError>;
}

/// Resolves a label, or `None` on any failure. The export writes the
/// "Unknown Location" placeholder for unlabelled samples.
pub async fn resolve_label(lookup: &dyn PlaceLookup, coordinate: Coordinate) -> Option<String> {
    match lookup.lookup(coordinate).await {
        Ok(label) => Some(label),
        Err(err) => {
            debug!("Place lookup failed, leaving sample unlabelled: {}", err);
            None
        }
    }
}

/// Used when no lookup is configured. Samples stay unlabelled.
pub struct NoLookup;

#[async_trait::async_trait]
impl PlaceLookup for NoLookup {
    async fn lookup(&self, _coordinate: Coordinate) -> Result<String, LookupError> {
        Err(LookupError::Unavailable("no place lookup configured".into()))
    }
}

/// Names the country containing a coordinate, from a GeoJSON country file
/// whose features carry an `iso_a2` property.
pub struct CountryLookup {
    countries: HashMap<String, CountryFeature>,
    last_hit: Mutex<Option<String>>,
}

struct CountryFeature {
    country: Country,
    polygon: Geometry,
}

impl CountryLookup {
    pub fn from_file(path: &Path) -> Result<Self, TrackerError> {
        let file = File::open(path)?;
        let geojson = GeoJson::from_reader(BufReader::new(file)).map_err(geojson::Error::from)?;
        Self::from_geojson(geojson)
    }

    pub fn from_geojson(geojson: GeoJson) -> Result<Self, TrackerError> {
        let features = FeatureCollection::try_from(geojson)?;

        let mut countries = HashMap::new();

        for feature in features.features {
            let Some(iso_a2) = feature.property("iso_a2").and_then(|value| value.as_str()).map(str::to_owned) else {
                continue;
            };
            if iso_a2 == "-99" {
                continue;
            }
            let Ok(country) = Country::from_alpha2(&iso_a2) else {
                warn!("Skipping unknown country code {}", iso_a2);
                continue;
            };
            let Some(geometry) = feature.geometry else {
                continue;
            };

            let country_feature = CountryFeature {
                country,
                polygon: Geometry::try_from(geometry)?,
            };
            countries.insert(iso_a2, country_feature);
        }

        debug!("Loaded {} country outlines", countries.len());

        Ok(Self {
            countries,
            last_hit: Mutex::new(None),
        })
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    pub fn get_country(&self, lat: f64, lon: f64, previous: Option<&str>) -> Option<&Country> {
        let pt = point!(x: lon, y: lat);

        // Consecutive samples are almost always in the same country
        if let Some(country_feature) = previous.and_then(|code| self.countries.get(code)) {
            if country_feature.polygon.contains(&pt) {
                return Some(&country_feature.country);
            }
        }

        self.countries
            .values()
            .find(|country_feature| country_feature.polygon.contains(&pt))
            .map(|country_feature| &country_feature.country)
    }
}

#[async_trait::async_trait]
impl PlaceLookup for CountryLookup {
    async fn lookup(&self, coordinate: Coordinate) -> Result<String, LookupError> {
        let mut last_hit = self.last_hit.lock().map_err(|_| LookupError::Unavailable("lookup cache poisoned".into()))?;

        let country = self
            .get_country(coordinate.lat, coordinate.lon, last_hit.as_deref())
            .ok_or(LookupError::NotFound { lat: coordinate.lat, lon: coordinate.lon })?;

        *last_hit = Some(country.alpha2.to_owned());
        Ok(country.long_name.to_owned())
    }
}
