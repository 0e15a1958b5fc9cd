use crate::directions::{
    ComputedRoute, DirectionsProvider, LegEstimate, LegSummary, Maneuver, Step,
};
use crate::error::{Result, TrackingError};
use crate::gtfs::Coordinate;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

/// Client for a Google-style Directions JSON API.
pub struct GoogleDirectionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GoogleDirectionsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    async fn request(&self, params: Vec<(&'static str, String)>) -> Result<DirectionsResponse> {
        let mut query = params;
        query.push(("key", self.api_key.clone()));

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<DirectionsResponse>().await?)
    }
}

impl DirectionsProvider for GoogleDirectionsClient {
    fn route_leg<'a>(
        &'a self,
        origin: Coordinate,
        destination: Coordinate,
        departure: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<LegEstimate>> {
        Box::pin(async move {
            let params = vec![
                ("origin", format_coordinate(origin)),
                ("destination", format_coordinate(destination)),
                ("departure_time", format_departure(departure)),
                ("traffic_model", "best_guess".to_string()),
            ];
            let response = self.request(params).await?;
            parse_leg_estimate(response)
        })
    }

    fn compute_route<'a>(
        &'a self,
        origin: Coordinate,
        destination: Coordinate,
        waypoints: &'a [Coordinate],
        optimize_waypoints: bool,
    ) -> BoxFuture<'a, Result<ComputedRoute>> {
        Box::pin(async move {
            let mut params = vec![
                ("origin", format_coordinate(origin)),
                ("destination", format_coordinate(destination)),
                ("departure_time", "now".to_string()),
            ];
            if !waypoints.is_empty() {
                params.push(("waypoints", format_waypoints(waypoints, optimize_waypoints)));
            }

            debug!(waypoints = waypoints.len(), optimize_waypoints, "Requesting route");
            let response = self.request(params).await?;
            parse_computed_route(response)
        })
    }
}

fn format_coordinate(c: Coordinate) -> String {
    format!("{:.6},{:.6}", c.lat, c.lon)
}

// The API rejects departure times in the past
fn format_departure(departure: DateTime<Utc>) -> String {
    if departure <= Utc::now() {
        "now".to_string()
    } else {
        departure.timestamp().to_string()
    }
}

fn format_waypoints(waypoints: &[Coordinate], optimize: bool) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(waypoints.len() + 1);
    if optimize {
        parts.push("optimize:true".to_string());
    }
    parts.extend(waypoints.iter().map(|w| format_coordinate(*w)));
    parts.join("|")
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    #[serde(default)]
    legs: Vec<ApiLeg>,
    #[serde(default)]
    waypoint_order: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct ApiLeg {
    distance: ApiValue,
    duration: ApiValue,
    #[serde(default)]
    duration_in_traffic: Option<ApiValue>,
    #[serde(default)]
    start_address: String,
    #[serde(default)]
    end_address: String,
    #[serde(default)]
    steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
struct ApiStep {
    html_instructions: String,
    #[serde(default)]
    maneuver: Option<String>,
    distance: ApiValue,
    duration: ApiValue,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiValue {
    value: f64,
    text: String,
}

fn first_route(response: DirectionsResponse) -> Result<ApiRoute> {
    if response.status != "OK" {
        let detail = match response.error_message {
            Some(message) => format!("{}: {}", response.status, message),
            None => response.status,
        };
        return Err(TrackingError::ProviderUnavailable(detail));
    }

    response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| TrackingError::ProviderUnavailable("no routes returned".to_string()))
}

fn parse_leg_estimate(response: DirectionsResponse) -> Result<LegEstimate> {
    let route = first_route(response)?;
    let leg = route
        .legs
        .into_iter()
        .next()
        .ok_or_else(|| TrackingError::ProviderUnavailable("route has no legs".to_string()))?;

    let duration = leg.duration_in_traffic.unwrap_or(leg.duration);
    Ok(LegEstimate {
        duration_secs: duration.value.max(0.0).round() as u64,
        duration_text: duration.text,
    })
}

fn parse_computed_route(response: DirectionsResponse) -> Result<ComputedRoute> {
    let route = first_route(response)?;

    let mut computed = ComputedRoute {
        waypoint_order: route.waypoint_order,
        ..Default::default()
    };

    for leg in route.legs {
        let duration = leg.duration_in_traffic.as_ref().unwrap_or(&leg.duration);
        computed.leg_summaries.push(LegSummary {
            start_address: leg.start_address,
            end_address: leg.end_address,
            distance_m: leg.distance.value,
            duration_secs: duration.value.max(0.0).round() as u64,
        });

        computed.steps.extend(leg.steps.into_iter().map(|s| Step {
            maneuver: Maneuver::from_code(s.maneuver.as_deref()),
            instruction: strip_html(&s.html_instructions),
            distance_m: s.distance.value,
            duration_secs: s.duration.value.max(0.0).round() as u64,
        }));
    }

    Ok(computed)
}

/// Drops markup from instruction text. Block tags become spaces so trailing
/// hints don't run into the street name.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.trim_start_matches('/').split_whitespace().next().unwrap_or("");
                if name.eq_ignore_ascii_case("div") || name.eq_ignore_ascii_case("br") {
                    out.push(' ');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => out.push(ch),
        }
    }

    decode_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes the named entities the API emits plus any numeric `&#N;` /
/// `&#xN;` reference. Anything unrecognised is left as written.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}
