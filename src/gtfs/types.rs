use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub location: Coordinate,
}

/// Static description of a route handed to the tracker when tracking begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePlan {
    pub route_id: String,
    pub name: String,
    /// Planned path vertices in travel order. Empty when the route has no shape.
    pub path: Vec<Coordinate>,
    /// Stops in sequence order.
    pub stops: Vec<Stop>,
}

// Raw GTFS rows, deserialized by header name.

#[derive(Debug, Deserialize)]
pub(crate) struct RouteRecord {
    pub route_id: String,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
}

impl RouteRecord {
    pub fn display_name(&self) -> String {
        self.route_short_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.route_long_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.route_id)
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TripRecord {
    pub route_id: String,
    pub trip_id: String,
    #[serde(default)]
    pub shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShapePointRecord {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopRecord {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub stop_lat: Option<f64>,
    #[serde(default)]
    pub stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopTimeRecord {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
}
