use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TrackingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Subscription error on route {route_id}: {message}")]
    Subscription { route_id: String, message: String },

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("GTFS error: {0}")]
    Gtfs(String),
}

impl TrackingError {
    pub fn subscription(route_id: &str, message: impl Into<String>) -> Self {
        Self::Subscription {
            route_id: route_id.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TrackingError {
    fn from(e: reqwest::Error) -> Self {
        Self::ProviderUnavailable(e.to_string())
    }
}

impl From<prost::DecodeError> for TrackingError {
    fn from(e: prost::DecodeError) -> Self {
        Self::Feed(e.to_string())
    }
}

impl From<zip::result::ZipError> for TrackingError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Gtfs(e.to_string())
    }
}

impl From<csv::Error> for TrackingError {
    fn from(e: csv::Error) -> Self {
        Self::Gtfs(e.to_string())
    }
}

impl From<std::io::Error> for TrackingError {
    fn from(e: std::io::Error) -> Self {
        Self::Gtfs(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
