use crate::error::{Result, TrackingError};
use crate::gtfs::types::{
    RouteRecord, ShapePointRecord, StopRecord, StopTimeRecord, TripRecord,
};
use crate::gtfs::{Coordinate, RoutePlan, Stop};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use tracing::{info, warn};

/// Downloads a static GTFS zip and builds a plan for each requested route.
/// An empty `route_ids` slice selects every route in the feed.
pub async fn load_route_plans(url: &str, route_ids: &[String]) -> Result<Vec<RoutePlan>> {
    info!("Downloading GTFS from {}", url);

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TrackingError::Gtfs(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| TrackingError::Gtfs(e.to_string()))?;

    info!("Downloaded {} bytes, extracting...", bytes.len());

    parse_route_plans(Cursor::new(bytes.as_ref()), route_ids)
}

pub fn parse_route_plans<R: Read + Seek>(reader: R, route_ids: &[String]) -> Result<Vec<RoutePlan>> {
    let mut archive = zip::ZipArchive::new(reader)?;

    let routes: Vec<RouteRecord> = read_records(&mut archive, "routes.txt")?;
    let trips: Vec<TripRecord> = read_records(&mut archive, "trips.txt")?;
    let stops: Vec<StopRecord> = read_records(&mut archive, "stops.txt")?;
    let stop_times: Vec<StopTimeRecord> = read_records(&mut archive, "stop_times.txt")?;
    // shapes.txt is optional in GTFS
    let shape_points: Vec<ShapePointRecord> = if archive.file_names().any(|n| n == "shapes.txt") {
        read_records(&mut archive, "shapes.txt")?
    } else {
        Vec::new()
    };

    let shapes = build_shapes(shape_points);
    let stops_by_id: HashMap<String, Stop> = stops
        .into_iter()
        .filter_map(|s| {
            let location = Coordinate::new(s.stop_lat?, s.stop_lon?);
            Some((
                s.stop_id.clone(),
                Stop {
                    name: s.stop_name.unwrap_or_else(|| s.stop_id.clone()),
                    id: s.stop_id,
                    location,
                },
            ))
        })
        .collect();

    let mut stop_times_by_trip: HashMap<String, Vec<StopTimeRecord>> = HashMap::new();
    for st in stop_times {
        stop_times_by_trip.entry(st.trip_id.clone()).or_default().push(st);
    }
    for times in stop_times_by_trip.values_mut() {
        times.sort_by_key(|st| st.stop_sequence);
    }

    let mut plans = Vec::new();
    for route in &routes {
        if !route_ids.is_empty() && !route_ids.contains(&route.route_id) {
            continue;
        }

        let route_trips: Vec<&TripRecord> =
            trips.iter().filter(|t| t.route_id == route.route_id).collect();

        let path = route_trips
            .iter()
            .filter_map(|t| t.shape_id.as_deref())
            .find_map(|shape_id| shapes.get(shape_id))
            .cloned()
            .unwrap_or_default();

        // The longest trip is taken as the route's full stop pattern
        let stops = route_trips
            .iter()
            .filter_map(|t| stop_times_by_trip.get(&t.trip_id))
            .max_by_key(|times| times.len())
            .map(|times| {
                times
                    .iter()
                    .filter_map(|st| stops_by_id.get(&st.stop_id).cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if path.is_empty() {
            warn!(route_id = %route.route_id, "Route has no shape, deviation checks disabled");
        }

        plans.push(RoutePlan {
            route_id: route.route_id.clone(),
            name: route.display_name(),
            path,
            stops,
        });
    }

    for requested in route_ids {
        if !plans.iter().any(|p| &p.route_id == requested) {
            warn!(route_id = %requested, "Requested route not present in GTFS");
        }
    }

    info!("Built {} route plans", plans.len());
    Ok(plans)
}

fn read_records<R: Read + Seek, T: DeserializeOwned>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<T>> {
    let file = archive.by_name(name)?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut records = Vec::new();
    for result in reader.deserialize::<T>() {
        records.push(result?);
    }
    Ok(records)
}

fn build_shapes(points: Vec<ShapePointRecord>) -> HashMap<String, Vec<Coordinate>> {
    let mut grouped: HashMap<String, Vec<ShapePointRecord>> = HashMap::new();
    for point in points {
        grouped.entry(point.shape_id.clone()).or_default().push(point);
    }

    grouped
        .into_iter()
        .map(|(shape_id, mut pts)| {
            pts.sort_by_key(|p| p.shape_pt_sequence);
            let path = pts
                .iter()
                .map(|p| Coordinate::new(p.shape_pt_lat, p.shape_pt_lon))
                .collect();
            (shape_id, path)
        })
        .collect()
}
