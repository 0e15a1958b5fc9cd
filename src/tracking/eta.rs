use crate::directions::{DirectionsProvider, LegEstimate};
use crate::error::{Result, TrackingError};
use crate::gtfs::{Coordinate, RoutePlan};
use crate::matcher::proximity::is_within_radius;
use crate::realtime::Position;
use crate::tracking::config::{ThresholdMatching, TrackingConfig};
use crate::tracking::notify::Notifier;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Arrival estimate and alert bookkeeping for one stop within one trip.
#[derive(Debug, Clone, Serialize)]
pub struct StopEta {
    pub stop_id: String,
    pub stop_name: String,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub remaining_secs: Option<u64>,
    pub duration_text: Option<String>,
    /// Minute thresholds already alerted this trip. Only grows until the trip ends.
    pub fired_thresholds: BTreeSet<u32>,
    pub arrived: bool,
    #[serde(skip)]
    location: Coordinate,
    #[serde(skip)]
    consecutive_failures: u32,
    #[serde(skip)]
    in_flight: bool,
}

impl StopEta {
    fn new(stop_id: &str, stop_name: &str, location: Coordinate) -> Self {
        Self {
            stop_id: stop_id.to_string(),
            stop_name: stop_name.to_string(),
            estimated_arrival: None,
            remaining_secs: None,
            duration_text: None,
            fired_thresholds: BTreeSet::new(),
            arrived: false,
            location,
            consecutive_failures: 0,
            in_flight: false,
        }
    }

    pub fn remaining_minutes(&self) -> Option<u64> {
        self.remaining_secs.map(round_minutes)
    }

    /// Stores a fresh estimate and returns the threshold to alert on, if any.
    pub fn record_estimate(
        &mut self,
        estimate: &LegEstimate,
        now: DateTime<Utc>,
        thresholds: &[u32],
        matching: ThresholdMatching,
    ) -> Option<u32> {
        self.remaining_secs = Some(estimate.duration_secs);
        self.estimated_arrival = Some(now + Duration::seconds(estimate.duration_secs as i64));
        self.duration_text = Some(estimate.duration_text.clone());
        self.consecutive_failures = 0;

        let minutes = round_minutes(estimate.duration_secs);
        match matching {
            ThresholdMatching::Exact => {
                let hit = thresholds
                    .iter()
                    .copied()
                    .find(|&t| u64::from(t) == minutes && !self.fired_thresholds.contains(&t))?;
                self.fired_thresholds.insert(hit);
                Some(hit)
            }
            ThresholdMatching::AtOrBelow => {
                let passed: Vec<u32> = thresholds
                    .iter()
                    .copied()
                    .filter(|&t| minutes <= u64::from(t) && !self.fired_thresholds.contains(&t))
                    .collect();
                let smallest = passed.iter().copied().min()?;
                self.fired_thresholds.extend(passed);
                Some(smallest)
            }
        }
    }

    /// Keeps the last estimate until failures pile up, then clears it.
    pub fn record_failure(&mut self, max_failures: u32) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= max_failures {
            self.estimated_arrival = None;
            self.remaining_secs = None;
            self.duration_text = None;
        }
    }
}

fn round_minutes(secs: u64) -> u64 {
    (secs as f64 / 60.0).round() as u64
}

#[derive(Debug)]
struct TripEtas {
    epoch: u64,
    route_name: String,
    stops: Vec<StopEta>,
    completed: bool,
}

impl TripEtas {
    fn stop_mut(&mut self, stop_id: &str) -> Option<&mut StopEta> {
        self.stops.iter_mut().find(|s| s.stop_id == stop_id)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TripProgress {
    pub newly_arrived: Vec<String>,
    pub completed_now: bool,
}

/// Requests travel times for pending stops and raises threshold alerts.
///
/// Trip state is keyed by route id. Each trip gets a fresh epoch; a provider
/// response is only applied if its route is still on the epoch it started on.
pub struct EtaEngine {
    provider: Arc<dyn DirectionsProvider>,
    notifier: Arc<dyn Notifier>,
    config: TrackingConfig,
    trips: Mutex<HashMap<String, TripEtas>>,
    next_epoch: AtomicU64,
}

impl EtaEngine {
    pub fn new(
        provider: Arc<dyn DirectionsProvider>,
        notifier: Arc<dyn Notifier>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            provider,
            notifier,
            config,
            trips: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    fn trips(&self) -> MutexGuard<'_, HashMap<String, TripEtas>> {
        match self.trips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts a new trip for the plan's route: every stop pending, no thresholds fired.
    pub fn begin_trip(&self, plan: &RoutePlan) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let stops = plan
            .stops
            .iter()
            .map(|s| StopEta::new(&s.id, &s.name, s.location))
            .collect();

        self.trips().insert(
            plan.route_id.clone(),
            TripEtas {
                epoch,
                route_name: plan.name.clone(),
                stops,
                completed: false,
            },
        );
        info!(route_id = %plan.route_id, epoch, "Trip started");
        epoch
    }

    pub fn end_trip(&self, route_id: &str) {
        if self.trips().remove(route_id).is_some() {
            info!(route_id, "Trip ended");
        }
    }

    pub fn stop_etas(&self, route_id: &str) -> Vec<StopEta> {
        self.trips()
            .get(route_id)
            .map(|t| t.stops.clone())
            .unwrap_or_default()
    }

    pub fn is_completed(&self, route_id: &str) -> bool {
        self.trips().get(route_id).is_some_and(|t| t.completed)
    }

    pub fn pending_stops(&self, route_id: &str) -> Vec<String> {
        self.trips()
            .get(route_id)
            .map(|t| {
                t.stops
                    .iter()
                    .filter(|s| !s.arrived)
                    .map(|s| s.stop_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks stops within the arrival radius of `at` as reached.
    pub fn mark_arrivals(&self, route_id: &str, at: Coordinate) -> TripProgress {
        let mut trips = self.trips();
        let Some(trip) = trips.get_mut(route_id) else {
            return TripProgress::default();
        };

        let mut progress = TripProgress::default();
        for stop in trip.stops.iter_mut().filter(|s| !s.arrived) {
            if is_within_radius(at, stop.location, self.config.arrival_radius_m) {
                stop.arrived = true;
                stop.remaining_secs = Some(0);
                info!(route_id, stop_id = %stop.stop_id, "Stop reached");
                progress.newly_arrived.push(stop.stop_id.clone());
            }
        }

        if !trip.completed && !trip.stops.is_empty() && trip.stops.iter().all(|s| s.arrived) {
            trip.completed = true;
            progress.completed_now = true;
        }
        progress
    }

    /// Refreshes the estimate for one stop from `position` and alerts on any
    /// newly crossed threshold.
    ///
    /// Returns `Ok(None)` when there is nothing to do or the result went
    /// stale: the route's trip ended or restarted while the request was out,
    /// the stop was already reached, or another request for it is pending.
    /// A provider error or timeout leaves the thresholds untouched.
    pub async fn estimate_and_notify(
        &self,
        route_id: &str,
        stop_id: &str,
        position: &Position,
    ) -> Result<Option<StopEta>> {
        let (epoch, destination) = {
            let mut trips = self.trips();
            let Some(trip) = trips.get_mut(route_id) else {
                return Ok(None);
            };
            let epoch = trip.epoch;
            let Some(stop) = trip.stop_mut(stop_id) else {
                return Ok(None);
            };
            if stop.arrived || stop.in_flight {
                return Ok(None);
            }
            stop.in_flight = true;
            (epoch, stop.location)
        };

        let request = self
            .provider
            .route_leg(position.coordinate(), destination, Utc::now());
        let result = match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(TrackingError::ProviderUnavailable(format!(
                "no response within {}ms",
                self.config.request_timeout.as_millis()
            ))),
        };

        let (snapshot, alert) = {
            let mut trips = self.trips();
            let Some(trip) = trips.get_mut(route_id).filter(|t| t.epoch == epoch) else {
                debug!(route_id, stop_id, epoch, "Discarding ETA for ended trip");
                return Ok(None);
            };
            let route_name = trip.route_name.clone();
            let Some(stop) = trip.stop_mut(stop_id) else {
                return Ok(None);
            };
            stop.in_flight = false;
            if stop.arrived {
                return Ok(None);
            }

            match result {
                Ok(estimate) => {
                    let fired = stop.record_estimate(
                        &estimate,
                        Utc::now(),
                        &self.config.notify_minutes,
                        self.config.threshold_matching,
                    );
                    let snapshot = stop.clone();
                    let alert =
                        fired.map(|minutes| self.compose_alert(&route_name, &snapshot, minutes));
                    (snapshot, alert)
                }
                Err(e) => {
                    stop.record_failure(self.config.max_provider_failures);
                    warn!(
                        route_id,
                        stop_id,
                        failures = stop.consecutive_failures,
                        "ETA request failed: {}",
                        e
                    );
                    return Err(e);
                }
            }
        };

        if let Some((title, body)) = alert {
            info!(route_id, stop_id, "Sending arrival alert: {}", title);
            self.notifier.notify(&title, &body);
        }

        Ok(Some(snapshot))
    }

    fn compose_alert(&self, route_name: &str, stop: &StopEta, minutes: u32) -> (String, String) {
        let title = format!("{}: arriving in {} min", route_name, minutes);
        let body = match stop.estimated_arrival {
            Some(at) => format!(
                "Expected at {} around {}",
                stop.stop_name,
                at.with_timezone(&self.config.timezone).format("%H:%M")
            ),
            None => format!("Expected at {} soon", stop.stop_name),
        };
        (title, body)
    }
}
