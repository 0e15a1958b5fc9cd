use crate::matcher::deviation::DEFAULT_OFF_ROUTE_THRESHOLD_M;
use crate::matcher::speed::DEFAULT_SPEED_LIMIT_MPH;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_NOTIFY_MINUTES: [u32; 3] = [20, 10, 5];
pub const DEFAULT_ARRIVAL_RADIUS_M: f64 = 50.0;
pub const DEFAULT_MAX_PROVIDER_FAILURES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// How remaining minutes are compared against notification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdMatching {
    /// Fires when the rounded remaining minutes equal the threshold. A feed
    /// slower than one update per minute can step over a threshold entirely.
    #[default]
    Exact,
    /// Fires once for the smallest unfired threshold at or above the rounded
    /// remaining minutes, marking every threshold it passed as fired.
    AtOrBelow,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub off_route_threshold_m: f64,
    pub speed_limit_mph: f64,
    pub notify_minutes: Vec<u32>,
    pub threshold_matching: ThresholdMatching,
    /// A stop counts as reached once a report lands within this distance.
    pub arrival_radius_m: f64,
    /// Consecutive ETA failures after which a stop shows no estimate.
    pub max_provider_failures: u32,
    /// Upper bound on any single feed or directions request.
    pub request_timeout: Duration,
    pub timezone: chrono_tz::Tz,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            off_route_threshold_m: DEFAULT_OFF_ROUTE_THRESHOLD_M,
            speed_limit_mph: DEFAULT_SPEED_LIMIT_MPH,
            notify_minutes: DEFAULT_NOTIFY_MINUTES.to_vec(),
            threshold_matching: ThresholdMatching::Exact,
            arrival_radius_m: DEFAULT_ARRIVAL_RADIUS_M,
            max_provider_failures: DEFAULT_MAX_PROVIDER_FAILURES,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            timezone: chrono_tz::UTC,
        }
    }
}
