//! Routing and travel-time provider seam.
//!
//! The tracker and the navigation session take an `Arc<dyn DirectionsProvider>`
//! built once in `main`, so tests can swap in scripted providers.

pub mod google;

use crate::error::Result;
use crate::gtfs::Coordinate;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use google::GoogleDirectionsClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegEstimate {
    pub duration_secs: u64,
    pub duration_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Maneuver {
    Continue,
    Straight,
    TurnLeft,
    TurnRight,
    SlightLeft,
    SlightRight,
    SharpLeft,
    SharpRight,
    UturnLeft,
    UturnRight,
    KeepLeft,
    KeepRight,
    RampLeft,
    RampRight,
    ForkLeft,
    ForkRight,
    RoundaboutLeft,
    RoundaboutRight,
    Merge,
    Ferry,
}

impl Maneuver {
    /// Parses provider maneuver codes such as `turn-slight-left`. Steps with
    /// no code just continue along the current road.
    pub fn from_code(code: Option<&str>) -> Self {
        match code.unwrap_or("") {
            "straight" => Self::Straight,
            "turn-left" => Self::TurnLeft,
            "turn-right" => Self::TurnRight,
            "turn-slight-left" => Self::SlightLeft,
            "turn-slight-right" => Self::SlightRight,
            "turn-sharp-left" => Self::SharpLeft,
            "turn-sharp-right" => Self::SharpRight,
            "uturn-left" => Self::UturnLeft,
            "uturn-right" => Self::UturnRight,
            "keep-left" => Self::KeepLeft,
            "keep-right" => Self::KeepRight,
            "ramp-left" => Self::RampLeft,
            "ramp-right" => Self::RampRight,
            "fork-left" => Self::ForkLeft,
            "fork-right" => Self::ForkRight,
            "roundabout-left" => Self::RoundaboutLeft,
            "roundabout-right" => Self::RoundaboutRight,
            "merge" => Self::Merge,
            "ferry" | "ferry-train" => Self::Ferry,
            _ => Self::Continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub maneuver: Maneuver,
    pub instruction: String,
    pub distance_m: f64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegSummary {
    pub start_address: String,
    pub end_address: String,
    pub distance_m: f64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComputedRoute {
    /// Steps of every leg, flattened in travel order.
    pub steps: Vec<Step>,
    pub leg_summaries: Vec<LegSummary>,
    /// Visiting order of the input waypoints chosen by the provider.
    pub waypoint_order: Vec<usize>,
}

pub trait DirectionsProvider: Send + Sync {
    /// Traffic-aware travel time for a single leg departing at `departure`.
    fn route_leg<'a>(
        &'a self,
        origin: Coordinate,
        destination: Coordinate,
        departure: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<LegEstimate>>;

    /// Multi-stop route. With `optimize_waypoints` the provider may reorder
    /// `waypoints`; `ComputedRoute::waypoint_order` reports the order used.
    fn compute_route<'a>(
        &'a self,
        origin: Coordinate,
        destination: Coordinate,
        waypoints: &'a [Coordinate],
        optimize_waypoints: bool,
    ) -> BoxFuture<'a, Result<ComputedRoute>>;
}
