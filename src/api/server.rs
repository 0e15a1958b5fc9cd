use crate::error::TrackingError;
use crate::gtfs::Coordinate;
use crate::navigation::{NavigationSession, NavigationView};
use crate::tracking::{PositionStreamManager, RouteSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub manager: PositionStreamManager,
    pub navigation: Arc<Mutex<NavigationSession>>,
}

#[derive(Debug, Deserialize)]
pub struct NavigationRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    #[serde(default)]
    pub waypoints: Vec<Coordinate>,
}

impl IntoResponse for TrackingError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TrackingError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            TrackingError::Subscription { .. } | TrackingError::Feed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TrackingError::Gtfs(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/routes", get(list_routes))
        .route("/routes/{route_id}", get(get_route).delete(stop_route))
        .route("/routes/{route_id}/restart", post(restart_route))
        .route(
            "/navigation",
            get(get_navigation)
                .post(compute_navigation)
                .delete(stop_navigation),
        )
        .route("/navigation/next", post(next_step))
        .route("/navigation/previous", post(previous_step))
        .with_state(state)
}

pub async fn run_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteSnapshot>> {
    Json(state.manager.snapshots().await)
}

async fn get_route(
    State(state): State<AppState>,
    Path(route_id): Path<String>,
) -> Result<Json<RouteSnapshot>, StatusCode> {
    state
        .manager
        .snapshot(&route_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn stop_route(State(state): State<AppState>, Path(route_id): Path<String>) -> StatusCode {
    if state.manager.stop_tracking(&route_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn restart_route(State(state): State<AppState>, Path(route_id): Path<String>) -> StatusCode {
    if state.manager.restart_trip(&route_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_navigation(State(state): State<AppState>) -> Json<NavigationView> {
    Json(state.navigation.lock().await.view())
}

async fn compute_navigation(
    State(state): State<AppState>,
    Json(request): Json<NavigationRequest>,
) -> Result<Json<NavigationView>, TrackingError> {
    let all_valid = request.origin.is_valid()
        && request.destination.is_valid()
        && request.waypoints.iter().all(|w| w.is_valid());
    if !all_valid {
        return Err(TrackingError::InvalidInput(
            "coordinates out of range".to_string(),
        ));
    }

    // Session lock is not held across the provider call
    let provider = state.navigation.lock().await.provider();
    let route = NavigationSession::plan_route(
        provider.as_ref(),
        request.origin,
        request.destination,
        &request.waypoints,
    )
    .await?;

    let mut session = state.navigation.lock().await;
    session.load(route);
    Ok(Json(session.view()))
}

async fn next_step(State(state): State<AppState>) -> Json<NavigationView> {
    let mut session = state.navigation.lock().await;
    session.advance();
    Json(session.view())
}

async fn previous_step(State(state): State<AppState>) -> Json<NavigationView> {
    let mut session = state.navigation.lock().await;
    session.retreat();
    Json(session.view())
}

async fn stop_navigation(State(state): State<AppState>) -> StatusCode {
    state.navigation.lock().await.stop();
    StatusCode::NO_CONTENT
}
