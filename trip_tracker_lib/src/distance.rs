use crate::coordinate::Coordinate;

/// Mean Earth radius used for all distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters (Haversine).
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    // Absolute deltas keep the result bit-for-bit symmetric
    let d_lat = (b.lat - a.lat).abs().to_radians();
    let d_lon = (b.lon - a.lon).abs().to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    let c = 2. * f64::atan2(h.sqrt(), (1. - h).max(0.).sqrt());

    EARTH_RADIUS_M * c
}
