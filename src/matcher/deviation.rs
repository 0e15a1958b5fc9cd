use crate::error::Result;
use crate::gtfs::Coordinate;
use crate::matcher::proximity::nearest_point_on_path;

pub const DEFAULT_OFF_ROUTE_THRESHOLD_M: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub off_route: bool,
    pub distance_m: f64,
}

/// Fails with `InvalidInput` on an empty path; callers suppress the check
/// instead of guessing either way.
pub fn check_deviation(position: Coordinate, path: &[Coordinate], threshold_m: f64) -> Result<Deviation> {
    let nearest = nearest_point_on_path(position, path)?;
    Ok(Deviation {
        off_route: nearest.distance_m > threshold_m,
        distance_m: nearest.distance_m,
    })
}
