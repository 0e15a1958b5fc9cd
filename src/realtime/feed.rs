use crate::error::Result;
use crate::gtfs::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub speed_mph: Option<f64>,
    /// Degrees clockwise from north.
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Run of the route this report belongs to, when the feed says. A change
    /// marks the start of a new trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
}

impl Position {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Position(Position),
    Error(String),
}

/// Receiving end of one route's position stream. Dropping the sender on the
/// feed side ends the stream.
#[derive(Debug)]
pub struct Subscription {
    route_id: String,
    receiver: mpsc::UnboundedReceiver<FeedEvent>,
}

impl Subscription {
    pub fn new(route_id: &str, receiver: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self {
            route_id: route_id.to_string(),
            receiver,
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }
}

pub trait PositionFeed: Send + Sync {
    /// Opens the stream for `route_id`. Fails if one is already open.
    fn subscribe(&self, route_id: &str) -> Result<Subscription>;

    fn unsubscribe(&self, route_id: &str);
}
