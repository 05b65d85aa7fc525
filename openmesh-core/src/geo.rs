//! Great-circle distance and coverage-area helpers
//!
//! Pure functions over coordinate pairs; no state, no I/O.

/// Earth's mean radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Rough degree -> km conversion at the equator, used by the
/// bounding-box area estimate
const KM_PER_DEGREE: f64 = 111.0;

/// Haversine distance between two coordinate pairs, in kilometers
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Bounding-box coverage area estimate in km²
///
/// Uses a flat 111 km/degree conversion, so the result degrades near
/// the poles and for node sets spanning the antimeridian. The
/// approximation is intentional and kept for compatibility with the
/// historical map display.
pub fn bounding_box_area_km2(coords: &[(f64, f64)]) -> f64 {
    if coords.len() < 2 {
        return 0.0;
    }

    let mut min_lat = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut min_lng = f64::INFINITY;
    let mut max_lng = f64::NEG_INFINITY;

    for &(lat, lng) in coords {
        min_lat = min_lat.min(lat);
        max_lat = max_lat.max(lat);
        min_lng = min_lng.min(lng);
        max_lng = max_lng.max(lng);
    }

    (max_lat - min_lat) * (max_lng - min_lng) * KM_PER_DEGREE * KM_PER_DEGREE
}

/// True when the pair is a well-formed WGS84 coordinate
pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}
