use crate::error::{Result, TrackingError};
use crate::realtime::feed::{FeedEvent, Position, PositionFeed, Subscription};
use chrono::{DateTime, Utc};
use prost::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MPS_TO_MPH: f64 = 2.236_936;

struct RouteSubscriber {
    sender: mpsc::UnboundedSender<FeedEvent>,
    /// Vehicle whose reports feed this route's stream.
    vehicle_id: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Polls a GTFS-RT VehiclePositions endpoint and routes each vehicle to the
/// subscriber for its trip's route.
///
/// A route stream follows one vehicle at a time. It stays on that vehicle
/// while the feed lists it and moves to the first listed vehicle otherwise.
/// Reports whose timestamp has not moved forward are not resent.
pub struct GtfsRealtimeFeed {
    url: String,
    interval: Duration,
    client: reqwest::Client,
    subscribers: Mutex<HashMap<String, RouteSubscriber>>,
}

impl GtfsRealtimeFeed {
    pub fn new(url: impl Into<String>, interval: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::Feed(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            interval,
            client,
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting realtime fetcher, polling {} every {}ms",
            self.url,
            self.interval.as_millis()
        );

        loop {
            match self.fetch_and_dispatch().await {
                Ok(count) => debug!("Dispatched {} vehicle positions", count),
                Err(e) => {
                    warn!("Fetch error: {}", e);
                    self.broadcast_error(&e.to_string());
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    async fn fetch_and_dispatch(&self) -> Result<usize> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TrackingError::Feed(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TrackingError::Feed(e.to_string()))?;

        let feed = gtfs_realtime::FeedMessage::decode(bytes.as_ref())?;
        Ok(self.dispatch(&feed))
    }

    /// Sends the followed vehicle of every subscribed route to that route's
    /// stream. Returns how many reports went out.
    pub fn dispatch(&self, feed: &gtfs_realtime::FeedMessage) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if subscribers.is_empty() {
            return 0;
        }

        let mut by_route: HashMap<&str, Vec<(String, &gtfs_realtime::VehiclePosition)>> =
            HashMap::new();
        for entity in &feed.entity {
            let Some(vehicle) = &entity.vehicle else {
                continue;
            };
            let Some(route_id) = vehicle.trip.as_ref().and_then(|t| t.route_id.as_deref()) else {
                continue;
            };
            if subscribers.contains_key(route_id) {
                by_route
                    .entry(route_id)
                    .or_default()
                    .push((vehicle_key(entity, vehicle), vehicle));
            }
        }

        let mut dispatched = 0;
        let mut closed = Vec::new();

        for (route_id, vehicles) in by_route {
            let Some(subscriber) = subscribers.get_mut(route_id) else {
                continue;
            };
            let followed = subscriber
                .vehicle_id
                .as_deref()
                .and_then(|id| vehicles.iter().find(|(key, _)| key == id));
            let (vehicle_id, vehicle) = match followed {
                Some(found) => found,
                None => {
                    let Some(first) = vehicles.first() else {
                        continue;
                    };
                    info!(route_id, vehicle_id = %first.0, "Following vehicle");
                    subscriber.vehicle_id = Some(first.0.clone());
                    subscriber.last_timestamp = None;
                    first
                }
            };
            if vehicles.len() > 1 {
                debug!(route_id, vehicle_id = %vehicle_id, ignored = vehicles.len() - 1, "Ignoring other vehicles on route");
            }

            let Some(position) = convert_position(vehicle, feed.header.timestamp) else {
                debug!(route_id, vehicle_id = %vehicle_id, "Skipping vehicle without usable position");
                continue;
            };
            if subscriber
                .last_timestamp
                .is_some_and(|last| position.timestamp <= last)
            {
                continue;
            }
            subscriber.last_timestamp = Some(position.timestamp);

            if subscriber.sender.send(FeedEvent::Position(position)).is_err() {
                closed.push(route_id.to_string());
            } else {
                dispatched += 1;
            }
        }

        for route_id in closed {
            subscribers.remove(&route_id);
        }

        dispatched
    }

    fn broadcast_error(&self, message: &str) {
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for subscriber in subscribers.values() {
            let _ = subscriber.sender.send(FeedEvent::Error(message.to_string()));
        }
    }
}

impl PositionFeed for GtfsRealtimeFeed {
    fn subscribe(&self, route_id: &str) -> Result<Subscription> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| TrackingError::subscription(route_id, "subscriber table poisoned"))?;

        if subscribers
            .get(route_id)
            .is_some_and(|s| !s.sender.is_closed())
        {
            return Err(TrackingError::subscription(route_id, "already subscribed"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.insert(
            route_id.to_string(),
            RouteSubscriber {
                sender: tx,
                vehicle_id: None,
                last_timestamp: None,
            },
        );
        Ok(Subscription::new(route_id, rx))
    }

    fn unsubscribe(&self, route_id: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(route_id);
        }
    }
}

fn vehicle_key(entity: &gtfs_realtime::FeedEntity, vehicle: &gtfs_realtime::VehiclePosition) -> String {
    vehicle
        .vehicle
        .as_ref()
        .and_then(|d| d.id.clone().or_else(|| d.label.clone()))
        .unwrap_or_else(|| entity.id.clone())
}

fn convert_position(
    vehicle: &gtfs_realtime::VehiclePosition,
    header_timestamp: Option<u64>,
) -> Option<Position> {
    let raw = vehicle.position.as_ref()?;
    let lat = raw.latitude as f64;
    let lon = raw.longitude as f64;

    // 0,0 is what most producers send when the fix is missing
    if lat.abs() < 0.001 && lon.abs() < 0.001 {
        return None;
    }

    let timestamp = vehicle
        .timestamp
        .or(header_timestamp)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .unwrap_or_else(Utc::now);

    Some(Position {
        lat,
        lon,
        speed_mph: raw.speed.map(|mps| mps as f64 * MPS_TO_MPH),
        heading: raw.bearing.map(|b| b as f64),
        timestamp,
        trip_id: vehicle.trip.as_ref().and_then(|t| t.trip_id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle_entity(id: &str, route_id: &str, lat: f32, lon: f32, speed: Option<f32>) -> gtfs_realtime::FeedEntity {
        gtfs_realtime::FeedEntity {
            id: id.to_string(),
            vehicle: Some(gtfs_realtime::VehiclePosition {
                trip: Some(gtfs_realtime::TripDescriptor {
                    route_id: Some(route_id.to_string()),
                    trip_id: Some(format!("trip-{id}")),
                    ..Default::default()
                }),
                vehicle: Some(gtfs_realtime::VehicleDescriptor {
                    id: Some(format!("bus-{id}")),
                    ..Default::default()
                }),
                position: Some(gtfs_realtime::Position {
                    latitude: lat,
                    longitude: lon,
                    speed,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn feed_with(entities: Vec<gtfs_realtime::FeedEntity>) -> gtfs_realtime::FeedMessage {
        feed_at(1_700_000_000, entities)
    }

    fn feed_at(timestamp: u64, entities: Vec<gtfs_realtime::FeedEntity>) -> gtfs_realtime::FeedMessage {
        gtfs_realtime::FeedMessage {
            header: gtfs_realtime::FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(timestamp),
                ..Default::default()
            },
            entity: entities,
        }
    }

    fn feed() -> GtfsRealtimeFeed {
        GtfsRealtimeFeed::new(
            "http://localhost/unused",
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn lat_of(event: Option<FeedEvent>) -> f64 {
        match event {
            Some(FeedEvent::Position(p)) => p.lat,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_trip_route_id() {
        let feed = feed();
        let mut sub_a = feed.subscribe("A").unwrap();
        let mut sub_b = feed.subscribe("B").unwrap();

        let message = feed_with(vec![
            vehicle_entity("1", "A", 33.6, -117.7, Some(10.0)),
            vehicle_entity("2", "B", 33.7, -117.8, None),
            vehicle_entity("3", "C", 33.8, -117.9, None),
        ]);
        assert_eq!(feed.dispatch(&message), 2);

        match sub_a.next().await {
            Some(FeedEvent::Position(p)) => {
                assert!((p.lat - 33.6).abs() < 1e-4);
                assert!((p.speed_mph.unwrap() - 22.36936).abs() < 1e-3);
                assert_eq!(p.timestamp.timestamp(), 1_700_000_000);
                assert_eq!(p.trip_id.as_deref(), Some("trip-1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match sub_b.next().await {
            Some(FeedEvent::Position(p)) => assert_eq!(p.speed_mph, None),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_subscription_rejected() {
        let feed = feed();
        let _sub = feed.subscribe("A").unwrap();
        assert!(matches!(
            feed.subscribe("A"),
            Err(TrackingError::Subscription { .. })
        ));

        feed.unsubscribe("A");
        assert!(feed.subscribe("A").is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let feed = feed();
        let mut sub = feed.subscribe("A").unwrap();
        feed.unsubscribe("A");

        let message = feed_with(vec![vehicle_entity("1", "A", 33.6, -117.7, None)]);
        assert_eq!(feed.dispatch(&message), 0);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_fix_skipped_and_errors_broadcast() {
        let feed = feed();
        let mut sub = feed.subscribe("A").unwrap();

        let message = feed_with(vec![vehicle_entity("1", "A", 0.0, 0.0, None)]);
        assert_eq!(feed.dispatch(&message), 0);

        feed.broadcast_error("boom");
        assert!(matches!(sub.next().await, Some(FeedEvent::Error(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn test_route_stream_follows_one_vehicle() {
        let feed = feed();
        let mut sub = feed.subscribe("A").unwrap();

        let first = feed_at(100, vec![
            vehicle_entity("1", "A", 33.6, -117.7, None),
            vehicle_entity("2", "A", 34.9, -117.7, None),
        ]);
        assert_eq!(feed.dispatch(&first), 1);
        assert!((lat_of(sub.next().await) - 33.6).abs() < 1e-4);

        // Listing order changes, the followed bus does not
        let second = feed_at(110, vec![
            vehicle_entity("2", "A", 34.8, -117.7, None),
            vehicle_entity("1", "A", 33.61, -117.7, None),
        ]);
        assert_eq!(feed.dispatch(&second), 1);
        assert!((lat_of(sub.next().await) - 33.61).abs() < 1e-4);

        // Followed bus drops out of the feed
        let third = feed_at(120, vec![vehicle_entity("2", "A", 34.7, -117.7, None)]);
        assert_eq!(feed.dispatch(&third), 1);
        assert!((lat_of(sub.next().await) - 34.7).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_unchanged_report_is_not_resent() {
        let feed = feed();
        let mut sub = feed.subscribe("A").unwrap();

        let message = feed_at(100, vec![vehicle_entity("1", "A", 33.6, -117.7, None)]);
        assert_eq!(feed.dispatch(&message), 1);
        assert_eq!(feed.dispatch(&message), 0);

        let older = feed_at(90, vec![vehicle_entity("1", "A", 33.5, -117.7, None)]);
        assert_eq!(feed.dispatch(&older), 0);

        let newer = feed_at(130, vec![vehicle_entity("1", "A", 33.62, -117.7, None)]);
        assert_eq!(feed.dispatch(&newer), 1);

        assert!((lat_of(sub.next().await) - 33.6).abs() < 1e-4);
        assert!((lat_of(sub.next().await) - 33.62).abs() < 1e-4);
    }
}
