//! Per-position checks: distance helpers, off-route detection and speed compliance.

pub mod deviation;
pub mod proximity;
pub mod speed;
