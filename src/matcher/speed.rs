pub const DEFAULT_SPEED_LIMIT_MPH: f64 = 45.0;

/// Missing or non-finite speed counts as stationary.
pub fn is_speeding(speed_mph: Option<f64>, limit_mph: f64) -> bool {
    match speed_mph {
        Some(speed) if speed.is_finite() => speed > limit_mph,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_exclusive() {
        assert!(is_speeding(Some(46.0), DEFAULT_SPEED_LIMIT_MPH));
        assert!(!is_speeding(Some(45.0), DEFAULT_SPEED_LIMIT_MPH));
        assert!(!is_speeding(Some(44.0), DEFAULT_SPEED_LIMIT_MPH));
    }

    #[test]
    fn test_missing_speed_never_violates() {
        assert!(!is_speeding(None, DEFAULT_SPEED_LIMIT_MPH));
        assert!(!is_speeding(Some(f64::NAN), DEFAULT_SPEED_LIMIT_MPH));
        assert!(!is_speeding(Some(f64::INFINITY), 0.0));
    }
}
