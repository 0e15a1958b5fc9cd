use crate::error::{Result, TrackingError};
use crate::gtfs::RoutePlan;
use crate::realtime::{FeedEvent, Position, PositionFeed, Subscription};
use crate::tracking::config::TrackingConfig;
use crate::tracking::eta::EtaEngine;
use crate::tracking::state::{RouteSnapshot, RouteTrackingState};
use crate::tracking::TrackingEvent;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

struct TrackedRoute {
    plan: Arc<RoutePlan>,
    generation: u64,
    /// Feed trip the current ETA trip belongs to, once one has been reported.
    trip_id: Option<String>,
    state: Option<RouteTrackingState>,
    task: JoinHandle<()>,
}

struct Inner {
    feed: Arc<dyn PositionFeed>,
    eta: Arc<EtaEngine>,
    config: TrackingConfig,
    routes: RwLock<HashMap<String, TrackedRoute>>,
    events: broadcast::Sender<TrackingEvent>,
    next_generation: AtomicU64,
}

/// Owns one feed subscription per tracked route and keeps each route's
/// derived state current.
///
/// Every route is served by its own task, so reports for one route are
/// handled strictly in arrival order while routes progress independently.
/// ETA requests run as detached tasks and never hold up position handling.
#[derive(Clone)]
pub struct PositionStreamManager {
    inner: Arc<Inner>,
}

impl PositionStreamManager {
    pub fn new(feed: Arc<dyn PositionFeed>, eta: Arc<EtaEngine>, config: TrackingConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                feed,
                eta,
                config,
                routes: RwLock::new(HashMap::new()),
                events,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackingEvent> {
        self.inner.events.subscribe()
    }

    /// Makes the tracked set equal to `plans`: routes not listed are torn
    /// down, new ones subscribed, and routes already tracked left as they are.
    /// Returns the routes that could not be subscribed.
    pub async fn track_routes(&self, plans: Vec<RoutePlan>) -> Vec<TrackingError> {
        let wanted: HashSet<String> = plans.iter().map(|p| p.route_id.clone()).collect();

        for route_id in self.tracked_route_ids().await {
            if !wanted.contains(&route_id) {
                self.stop_tracking(&route_id).await;
            }
        }

        let mut errors = Vec::new();
        for plan in plans {
            if let Err(e) = self.start_tracking(plan).await {
                warn!("{}", e);
                errors.push(e);
            }
        }
        errors
    }

    /// Begins tracking a route. Returns `Ok(false)` when it is already tracked.
    pub async fn start_tracking(&self, plan: RoutePlan) -> Result<bool> {
        let inner = &self.inner;
        let mut routes = inner.routes.write().await;
        if routes.contains_key(&plan.route_id) {
            debug!(route_id = %plan.route_id, "Already tracking");
            return Ok(false);
        }

        let subscription = inner.feed.subscribe(&plan.route_id)?;
        let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst);
        inner.eta.begin_trip(&plan);

        let task = tokio::spawn(run_route(
            inner.clone(),
            plan.route_id.clone(),
            generation,
            subscription,
        ));

        info!(
            route_id = %plan.route_id,
            stops = plan.stops.len(),
            path_points = plan.path.len(),
            "Tracking started"
        );
        routes.insert(
            plan.route_id.clone(),
            TrackedRoute {
                plan: Arc::new(plan),
                generation,
                trip_id: None,
                state: None,
                task,
            },
        );
        Ok(true)
    }

    /// Tears down a route. Once this returns no further report or ETA result
    /// for the route is applied.
    pub async fn stop_tracking(&self, route_id: &str) -> bool {
        let inner = &self.inner;
        let mut routes = inner.routes.write().await;
        let Some(route) = routes.remove(route_id) else {
            return false;
        };

        route.task.abort();
        inner.feed.unsubscribe(route_id);
        inner.eta.end_trip(route_id);
        info!(route_id, "Tracking stopped");
        true
    }

    pub async fn stop_all(&self) {
        for route_id in self.tracked_route_ids().await {
            self.stop_tracking(&route_id).await;
        }
    }

    /// Starts a new trip on a tracked route, clearing arrivals and fired alerts.
    /// Trips also restart on their own when the feed reports a new trip id.
    pub async fn restart_trip(&self, route_id: &str) -> bool {
        let snapshot = {
            let routes = self.inner.routes.read().await;
            let Some(route) = routes.get(route_id) else {
                return false;
            };
            self.inner.eta.begin_trip(&route.plan);
            self.inner.snapshot_of(route)
        };
        self.inner.emit(TrackingEvent::StateChanged(snapshot));
        true
    }

    pub async fn tracked_route_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.routes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self, route_id: &str) -> Option<RouteSnapshot> {
        let routes = self.inner.routes.read().await;
        routes.get(route_id).map(|r| self.inner.snapshot_of(r))
    }

    pub async fn snapshots(&self) -> Vec<RouteSnapshot> {
        let routes = self.inner.routes.read().await;
        let mut all: Vec<RouteSnapshot> = routes.values().map(|r| self.inner.snapshot_of(r)).collect();
        all.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        all
    }
}

async fn run_route(inner: Arc<Inner>, route_id: String, generation: u64, mut subscription: Subscription) {
    debug!(route_id = %route_id, generation, "Route stream open");

    while let Some(event) = subscription.next().await {
        match event {
            FeedEvent::Position(position) => inner.apply_update(&route_id, generation, position).await,
            FeedEvent::Error(message) => {
                let error = TrackingError::subscription(subscription.route_id(), message);
                warn!("{}", error);
                if inner.is_current(&route_id, generation).await {
                    inner.emit(TrackingEvent::RouteError {
                        route_id: route_id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    debug!(route_id = %route_id, generation, "Route stream closed");
}

impl Inner {
    fn emit(&self, event: TrackingEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn is_current(&self, route_id: &str, generation: u64) -> bool {
        self.routes
            .read()
            .await
            .get(route_id)
            .is_some_and(|r| r.generation == generation)
    }

    fn snapshot_of(&self, route: &TrackedRoute) -> RouteSnapshot {
        RouteSnapshot {
            route_id: route.plan.route_id.clone(),
            route_name: route.plan.name.clone(),
            tracking: route.state.clone(),
            stops: self.eta.stop_etas(&route.plan.route_id),
            trip_completed: self.eta.is_completed(&route.plan.route_id),
        }
    }

    /// Applies one report. Reports for untracked routes, or for an earlier
    /// subscription of the same route id, are dropped untouched. A report on
    /// a different feed trip than the last one starts a new ETA trip first.
    async fn apply_update(self: &Arc<Self>, route_id: &str, generation: u64, position: Position) {
        if !position.coordinate().is_valid() {
            warn!(route_id, lat = position.lat, lon = position.lon, "Ignoring invalid position");
            return;
        }

        let (snapshot, progress, pending) = {
            let mut routes = self.routes.write().await;
            let Some(route) = routes.get_mut(route_id).filter(|r| r.generation == generation) else {
                debug!(route_id, generation, "Dropping report for untracked route");
                return;
            };

            if position.trip_id.is_some() && position.trip_id != route.trip_id {
                if let Some(previous) = &route.trip_id {
                    info!(route_id, previous = %previous, trip_id = ?position.trip_id, "Vehicle started a new trip");
                    self.eta.begin_trip(&route.plan);
                }
                route.trip_id = position.trip_id.clone();
            }

            route.state = Some(RouteTrackingState::evaluate(
                &route.plan,
                position.clone(),
                &self.config,
            ));
            let progress = self.eta.mark_arrivals(route_id, position.coordinate());
            let pending = self.eta.pending_stops(route_id);
            (self.snapshot_of(route), progress, pending)
        };

        if let Some(tracking) = &snapshot.tracking {
            if tracking.is_off_route == Some(true) {
                debug!(route_id, distance_m = ?tracking.distance_from_path_m, "Vehicle off route");
            }
            if tracking.is_speeding {
                debug!(route_id, speed_mph = ?tracking.latest_position.speed_mph, "Vehicle speeding");
            }
        }

        self.emit(TrackingEvent::StateChanged(snapshot));
        if progress.completed_now {
            info!(route_id, "Trip completed");
            self.emit(TrackingEvent::TripCompleted {
                route_id: route_id.to_string(),
            });
        }

        for stop_id in pending {
            let inner = self.clone();
            let route_id = route_id.to_string();
            let position = position.clone();
            tokio::spawn(async move {
                match inner.eta.estimate_and_notify(&route_id, &stop_id, &position).await {
                    Ok(Some(eta)) => inner.emit(TrackingEvent::EtaUpdated { route_id, eta }),
                    Ok(None) => {}
                    Err(e) => inner.emit(TrackingEvent::RouteError {
                        route_id,
                        error: e.to_string(),
                    }),
                }
            });
        }
    }
}
