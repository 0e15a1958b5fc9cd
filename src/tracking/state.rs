use crate::gtfs::RoutePlan;
use crate::matcher::deviation::check_deviation;
use crate::matcher::speed::is_speeding;
use crate::realtime::Position;
use crate::tracking::config::TrackingConfig;
use crate::tracking::eta::StopEta;
use serde::Serialize;
use tracing::debug;

/// Flags derived from the latest report for one route. Rebuilt from scratch
/// on every report so the flags always describe `latest_position`.
#[derive(Debug, Clone, Serialize)]
pub struct RouteTrackingState {
    pub latest_position: Position,
    /// `None` when the route has no path to compare against.
    pub is_off_route: Option<bool>,
    pub distance_from_path_m: Option<f64>,
    pub is_speeding: bool,
}

impl RouteTrackingState {
    pub fn evaluate(plan: &RoutePlan, position: Position, config: &TrackingConfig) -> Self {
        let (is_off_route, distance_from_path_m) =
            match check_deviation(position.coordinate(), &plan.path, config.off_route_threshold_m) {
                Ok(deviation) => (Some(deviation.off_route), Some(deviation.distance_m)),
                Err(e) => {
                    debug!(route_id = %plan.route_id, "Deviation check skipped: {}", e);
                    (None, None)
                }
            };

        Self {
            is_speeding: is_speeding(position.speed_mph, config.speed_limit_mph),
            latest_position: position,
            is_off_route,
            distance_from_path_m,
        }
    }
}

/// Read-only view of one tracked route handed to UI consumers.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSnapshot {
    pub route_id: String,
    pub route_name: String,
    pub tracking: Option<RouteTrackingState>,
    pub stops: Vec<StopEta>,
    pub trip_completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::testing::{equator_plan, position};

    #[test]
    fn test_flags_follow_latest_position() {
        let plan = equator_plan("R1");
        let config = TrackingConfig::default();

        let on_path = RouteTrackingState::evaluate(&plan, position(0.0, 0.5, Some(30.0)), &config);
        assert_eq!(on_path.is_off_route, Some(false));
        assert!(!on_path.is_speeding);

        let off_path = RouteTrackingState::evaluate(&plan, position(0.01, 0.5, Some(46.0)), &config);
        assert_eq!(off_path.is_off_route, Some(true));
        assert!(off_path.is_speeding);
        assert!(off_path.distance_from_path_m.unwrap() > 1000.0);
    }

    #[test]
    fn test_wider_threshold_puts_vehicle_back_on_route() {
        let plan = equator_plan("R1");
        let config = TrackingConfig {
            off_route_threshold_m: 2000.0,
            ..TrackingConfig::default()
        };
        let state = RouteTrackingState::evaluate(&plan, position(0.01, 0.5, None), &config);
        assert_eq!(state.is_off_route, Some(false));
    }

    #[test]
    fn test_missing_path_reports_unknown() {
        let mut plan = equator_plan("R1");
        plan.path.clear();
        let state =
            RouteTrackingState::evaluate(&plan, position(5.0, 5.0, None), &TrackingConfig::default());
        assert_eq!(state.is_off_route, None);
        assert_eq!(state.distance_from_path_m, None);
    }
}
