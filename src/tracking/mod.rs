//! Live per-route tracking: derived flags, stop ETAs and arrival alerts.

pub mod config;
pub mod eta;
pub mod manager;
pub mod notify;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use serde::Serialize;

pub use config::{ThresholdMatching, TrackingConfig};
pub use eta::{EtaEngine, StopEta};
pub use manager::PositionStreamManager;
pub use notify::LogNotifier;
pub use state::RouteSnapshot;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    StateChanged(RouteSnapshot),
    EtaUpdated { route_id: String, eta: StopEta },
    RouteError { route_id: String, error: String },
    TripCompleted { route_id: String },
}
