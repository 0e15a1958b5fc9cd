mod api;
mod directions;
mod error;
mod gtfs;
mod matcher;
mod navigation;
mod realtime;
mod tracking;

use clap::Parser;
use directions::{google::DEFAULT_DIRECTIONS_URL, DirectionsProvider, GoogleDirectionsClient};
use navigation::NavigationSession;
use realtime::GtfsRealtimeFeed;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracking::{
    EtaEngine, LogNotifier, PositionStreamManager, ThresholdMatching, TrackingConfig,
    TrackingEvent,
};

#[derive(Parser)]
#[command(name = "route-watch")]
#[command(about = "Live route tracking with stop ETAs, arrival alerts and turn-by-turn stepping")]
struct Args {
    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value = "8080")]
    port: u16,

    /// GTFS-RT VehiclePositions endpoint
    #[arg(long, env = "VEHICLE_POSITIONS_URL")]
    feed_url: String,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Static GTFS zip providing route shapes and stops
    #[arg(long, env = "GTFS_URL")]
    gtfs_url: String,

    /// Route ids to track (repeatable). Tracks every route when omitted.
    #[arg(long = "route", env = "TRACK_ROUTES", value_delimiter = ',')]
    routes: Vec<String>,

    #[arg(long, env = "DIRECTIONS_URL", default_value = DEFAULT_DIRECTIONS_URL)]
    directions_url: String,

    #[arg(long, env = "DIRECTIONS_API_KEY")]
    directions_key: Option<String>,

    #[arg(long, default_value_t = matcher::deviation::DEFAULT_OFF_ROUTE_THRESHOLD_M)]
    off_route_threshold_m: f64,

    #[arg(long, default_value_t = matcher::speed::DEFAULT_SPEED_LIMIT_MPH)]
    speed_limit_mph: f64,

    /// Minutes-before-arrival at which to alert, once each per trip
    #[arg(long, value_delimiter = ',', default_values_t = tracking::config::DEFAULT_NOTIFY_MINUTES)]
    notify_minutes: Vec<u32>,

    #[arg(long, value_enum, default_value_t = ThresholdMatching::Exact)]
    threshold_matching: ThresholdMatching,

    #[arg(long, default_value_t = tracking::config::DEFAULT_ARRIVAL_RADIUS_M)]
    arrival_radius_m: f64,

    /// Timeout for each feed poll and directions request
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = tracking::config::DEFAULT_REQUEST_TIMEOUT_MS)]
    request_timeout_ms: u64,

    /// IANA timezone used in alert text
    #[arg(long, env = "TIMEZONE", default_value = "UTC", value_parser = parse_timezone)]
    timezone: chrono_tz::Tz,
}

impl Args {
    fn tracking_config(&self) -> TrackingConfig {
        TrackingConfig {
            off_route_threshold_m: self.off_route_threshold_m,
            speed_limit_mph: self.speed_limit_mph,
            notify_minutes: self.notify_minutes.clone(),
            threshold_matching: self.threshold_matching,
            arrival_radius_m: self.arrival_radius_m,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            timezone: self.timezone,
            ..TrackingConfig::default()
        }
    }
}

fn parse_timezone(s: &str) -> Result<chrono_tz::Tz, String> {
    s.parse::<chrono_tz::Tz>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.tracking_config();

    info!("Starting route-watch...");

    let plans = match gtfs::loader::load_route_plans(&args.gtfs_url, &args.routes).await {
        Ok(plans) if !plans.is_empty() => plans,
        Ok(_) => {
            error!("No routes to track");
            return;
        }
        Err(e) => {
            error!("Failed to load GTFS data: {}", e);
            return;
        }
    };

    if args.directions_key.is_none() {
        warn!("No directions API key configured, ETAs will be unavailable");
    }
    let directions: Arc<dyn DirectionsProvider> = match GoogleDirectionsClient::new(
        args.directions_url.clone(),
        args.directions_key.clone().unwrap_or_default(),
        config.request_timeout,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build directions client: {}", e);
            return;
        }
    };

    let feed = match GtfsRealtimeFeed::new(
        args.feed_url.clone(),
        Duration::from_millis(args.poll_interval_ms),
        config.request_timeout,
    ) {
        Ok(feed) => Arc::new(feed),
        Err(e) => {
            error!("Failed to build feed client: {}", e);
            return;
        }
    };
    let eta = Arc::new(EtaEngine::new(
        directions.clone(),
        Arc::new(LogNotifier),
        config.clone(),
    ));
    let manager = PositionStreamManager::new(feed.clone(), eta, config);

    let events = manager.subscribe_events();
    let errors = manager.track_routes(plans).await;
    info!(
        "Tracking {} routes ({} failed to subscribe)",
        manager.tracked_route_ids().await.len(),
        errors.len()
    );

    let fetcher_handle = tokio::spawn(feed.run());
    let events_handle = tokio::spawn(log_events(events));

    let state = api::server::AppState {
        manager: manager.clone(),
        navigation: Arc::new(Mutex::new(NavigationSession::new(directions))),
    };
    let port = args.port;
    let api_handle = tokio::spawn(async move { api::server::run_server(state, port).await });

    tokio::select! {
        _ = fetcher_handle => error!("Fetcher task exited"),
        _ = events_handle => error!("Event logger exited"),
        result = api_handle => match result {
            Ok(Err(e)) => error!("API server failed: {}", e),
            _ => error!("API server exited"),
        },
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    manager.stop_all().await;
}

async fn log_events(mut events: broadcast::Receiver<TrackingEvent>) {
    loop {
        match events.recv().await {
            Ok(TrackingEvent::StateChanged(snapshot)) => {
                if let Some(tracking) = &snapshot.tracking {
                    if tracking.is_off_route == Some(true) {
                        warn!(
                            route_id = %snapshot.route_id,
                            distance_m = ?tracking.distance_from_path_m,
                            "Vehicle off route"
                        );
                    }
                    if tracking.is_speeding {
                        warn!(
                            route_id = %snapshot.route_id,
                            speed_mph = ?tracking.latest_position.speed_mph,
                            "Vehicle speeding"
                        );
                    }
                }
            }
            Ok(TrackingEvent::EtaUpdated { route_id, eta }) => {
                info!(
                    route_id = %route_id,
                    stop_id = %eta.stop_id,
                    minutes = ?eta.remaining_minutes(),
                    "ETA updated"
                );
            }
            Ok(TrackingEvent::RouteError { route_id, error }) => {
                warn!(route_id = %route_id, "Route error: {}", error);
            }
            Ok(TrackingEvent::TripCompleted { route_id }) => {
                info!(route_id = %route_id, "Trip completed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
