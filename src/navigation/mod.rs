pub mod stepper;

use crate::directions::{ComputedRoute, DirectionsProvider, LegSummary};
use crate::error::Result;
use crate::gtfs::Coordinate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub use stepper::{NavigationStepper, StepperView};

/// Operator-facing turn-by-turn session backed by the shared directions provider.
pub struct NavigationSession {
    provider: Arc<dyn DirectionsProvider>,
    stepper: NavigationStepper,
    leg_summaries: Vec<LegSummary>,
    waypoint_order: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationView {
    #[serde(flatten)]
    pub stepper: StepperView,
    pub leg_summaries: Vec<LegSummary>,
    pub waypoint_order: Vec<usize>,
}

impl NavigationSession {
    pub fn new(provider: Arc<dyn DirectionsProvider>) -> Self {
        Self {
            provider,
            stepper: NavigationStepper::default(),
            leg_summaries: Vec::new(),
            waypoint_order: Vec::new(),
        }
    }

    pub fn provider(&self) -> Arc<dyn DirectionsProvider> {
        self.provider.clone()
    }

    /// Requests a route through `waypoints`, letting the provider reorder
    /// them. Touches no session; a failure leaves the current one as it is.
    pub async fn plan_route(
        provider: &dyn DirectionsProvider,
        origin: Coordinate,
        destination: Coordinate,
        waypoints: &[Coordinate],
    ) -> Result<ComputedRoute> {
        match provider
            .compute_route(origin, destination, waypoints, true)
            .await
        {
            Ok(route) => {
                info!(
                    "Computed route with {} legs and {} steps",
                    route.leg_summaries.len(),
                    route.steps.len()
                );
                Ok(route)
            }
            Err(e) => {
                warn!("Route computation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Replaces the session with `route`, cursor on its first step.
    pub fn load(&mut self, route: ComputedRoute) {
        self.stepper = NavigationStepper::new(route.steps);
        self.leg_summaries = route.leg_summaries;
        self.waypoint_order = route.waypoint_order;
    }

    pub fn stop(&mut self) {
        self.stepper.reset(Vec::new());
        self.leg_summaries.clear();
        self.waypoint_order.clear();
    }

    pub fn advance(&mut self) -> bool {
        self.stepper.advance()
    }

    pub fn retreat(&mut self) -> bool {
        self.stepper.retreat()
    }

    pub fn view(&self) -> NavigationView {
        NavigationView {
            stepper: self.stepper.view(),
            leg_summaries: self.leg_summaries.clone(),
            waypoint_order: self.waypoint_order.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::{LegEstimate, Maneuver, Step};
    use crate::error::TrackingError;
    use chrono::{DateTime, Utc};
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;

    struct ScriptedRoutes {
        responses: Mutex<Vec<Result<ComputedRoute>>>,
        seen_waypoints: Mutex<Vec<(usize, bool)>>,
    }

    impl DirectionsProvider for ScriptedRoutes {
        fn route_leg<'a>(
            &'a self,
            _origin: Coordinate,
            _destination: Coordinate,
            _departure: DateTime<Utc>,
        ) -> BoxFuture<'a, Result<LegEstimate>> {
            Box::pin(async { Err(TrackingError::ProviderUnavailable("unused".into())) })
        }

        fn compute_route<'a>(
            &'a self,
            _origin: Coordinate,
            _destination: Coordinate,
            waypoints: &'a [Coordinate],
            optimize_waypoints: bool,
        ) -> BoxFuture<'a, Result<ComputedRoute>> {
            self.seen_waypoints
                .lock()
                .unwrap()
                .push((waypoints.len(), optimize_waypoints));
            let next = self.responses.lock().unwrap().remove(0);
            Box::pin(async move { next })
        }
    }

    fn route(n: usize) -> ComputedRoute {
        ComputedRoute {
            steps: (0..n)
                .map(|i| Step {
                    maneuver: Maneuver::TurnRight,
                    instruction: format!("turn {i}"),
                    distance_m: 50.0,
                    duration_secs: 10,
                })
                .collect(),
            leg_summaries: Vec::new(),
            waypoint_order: vec![2, 0, 1],
        }
    }

    #[tokio::test]
    async fn test_load_resets_and_failure_keeps_session() {
        let provider = Arc::new(ScriptedRoutes {
            responses: Mutex::new(vec![
                Ok(route(3)),
                Err(TrackingError::ProviderUnavailable("down".into())),
                Ok(route(2)),
            ]),
            seen_waypoints: Mutex::new(Vec::new()),
        });
        let mut session = NavigationSession::new(provider.clone());
        let origin = Coordinate::new(0.0, 0.0);
        let destination = Coordinate::new(0.0, 1.0);
        let stops = [
            Coordinate::new(0.0, 0.2),
            Coordinate::new(0.0, 0.4),
            Coordinate::new(0.0, 0.6),
        ];

        let planned = NavigationSession::plan_route(provider.as_ref(), origin, destination, &stops)
            .await
            .unwrap();
        session.load(planned);
        assert_eq!(session.view().stepper.total_steps, 3);
        assert_eq!(session.view().waypoint_order, vec![2, 0, 1]);
        session.advance();
        session.advance();

        let provider_handle = session.provider();
        let failed =
            NavigationSession::plan_route(provider_handle.as_ref(), origin, destination, &stops).await;
        assert!(failed.is_err());
        assert_eq!(session.view().stepper.current_index, Some(2));

        let replanned = NavigationSession::plan_route(provider.as_ref(), origin, destination, &stops)
            .await
            .unwrap();
        session.load(replanned);
        let view = session.view();
        assert_eq!(view.stepper.current_index, Some(0));
        assert_eq!(view.stepper.total_steps, 2);

        assert!(provider
            .seen_waypoints
            .lock()
            .unwrap()
            .iter()
            .all(|&(n, optimize)| n == 3 && optimize));

        session.stop();
        assert!(!session.view().stepper.active);
    }
}
