//! Test doubles for the feed, directions provider and notifier.

use crate::directions::{ComputedRoute, DirectionsProvider, LegEstimate};
use crate::error::{Result, TrackingError};
use crate::gtfs::{Coordinate, RoutePlan, Stop};
use crate::realtime::{FeedEvent, Position, PositionFeed, Subscription};
use crate::tracking::notify::Notifier;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

#[derive(Default)]
pub struct ChannelFeed {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<FeedEvent>>>,
    subscribe_calls: AtomicUsize,
}

impl ChannelFeed {
    pub fn send(&self, route_id: &str, event: FeedEvent) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(route_id)
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }

    pub fn is_subscribed(&self, route_id: &str) -> bool {
        self.senders.lock().unwrap().contains_key(route_id)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl PositionFeed for ChannelFeed {
    fn subscribe(&self, route_id: &str) -> Result<Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut senders = self.senders.lock().unwrap();
        if senders.contains_key(route_id) {
            return Err(TrackingError::subscription(route_id, "already subscribed"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        senders.insert(route_id.to_string(), tx);
        Ok(Subscription::new(route_id, rx))
    }

    fn unsubscribe(&self, route_id: &str) {
        self.senders.lock().unwrap().remove(route_id);
    }
}

/// Answers `route_leg` from a queue of scripted durations (seconds) or
/// errors, and `compute_route` with an empty route. An optional gate holds
/// every response until a permit is added.
pub struct ScriptedDirections {
    responses: Mutex<VecDeque<Result<u64>>>,
    fallback_secs: Option<u64>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl ScriptedDirections {
    pub fn new(responses: Vec<Result<u64>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback_secs: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(secs: u64) -> Self {
        Self {
            fallback_secs: Some(secs),
            ..Self::new(Vec::new())
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DirectionsProvider for ScriptedDirections {
    fn route_leg<'a>(
        &'a self,
        _origin: Coordinate,
        _destination: Coordinate,
        _departure: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<LegEstimate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback_secs.map(Ok))
            .unwrap_or_else(|| Err(TrackingError::ProviderUnavailable("script exhausted".into())));
        let gate = self.gate.clone();

        Box::pin(async move {
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            next.map(|secs| LegEstimate {
                duration_secs: secs,
                duration_text: format!("{} mins", secs / 60),
            })
        })
    }

    fn compute_route<'a>(
        &'a self,
        _origin: Coordinate,
        _destination: Coordinate,
        _waypoints: &'a [Coordinate],
        _optimize_waypoints: bool,
    ) -> BoxFuture<'a, Result<ComputedRoute>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.clone();

        Box::pin(async move {
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            Ok(ComputedRoute::default())
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

/// Route running east along the equator from (0,0) to (0,1), sampled every
/// 0.01 degrees, with stops at both ends.
pub fn equator_plan(route_id: &str) -> RoutePlan {
    RoutePlan {
        route_id: route_id.to_string(),
        name: format!("Route {route_id}"),
        path: (0..=100)
            .map(|i| Coordinate::new(0.0, i as f64 / 100.0))
            .collect(),
        stops: vec![
            Stop {
                id: "west".into(),
                name: "West Depot".into(),
                location: Coordinate::new(0.0, 0.0),
            },
            Stop {
                id: "east".into(),
                name: "East School".into(),
                location: Coordinate::new(0.0, 1.0),
            },
        ],
    }
}

pub fn position(lat: f64, lon: f64, speed_mph: Option<f64>) -> Position {
    Position {
        lat,
        lon,
        speed_mph,
        heading: None,
        timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 7, 30, 0).unwrap(),
        trip_id: None,
    }
}
