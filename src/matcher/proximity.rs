use crate::error::{Result, TrackingError};
use crate::gtfs::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points
    let c = 2.0 * a.min(1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Great-circle distance in meters.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    pub vertex: Coordinate,
    pub index: usize,
    pub distance_m: f64,
}

/// Closest path vertex to `point`. Ties go to the earliest vertex.
pub fn nearest_point_on_path(point: Coordinate, path: &[Coordinate]) -> Result<NearestPoint> {
    let mut best: Option<NearestPoint> = None;

    for (index, vertex) in path.iter().enumerate() {
        let distance_m = distance_meters(point, *vertex);
        if best.map_or(true, |b| distance_m < b.distance_m) {
            best = Some(NearestPoint {
                vertex: *vertex,
                index,
                distance_m,
            });
        }
    }

    best.ok_or_else(|| TrackingError::InvalidInput("path has no vertices".to_string()))
}

pub fn is_within_radius(point: Coordinate, target: Coordinate, radius_m: f64) -> bool {
    distance_meters(point, target) <= radius_m
}
