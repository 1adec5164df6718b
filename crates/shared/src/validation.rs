//! Field-level validation shared by the Processor and the HTTP adapter.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Maximum length of a `device_id`, in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 50;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for FieldError {}

fn err(field: &'static str, message: impl Into<String>) -> FieldError {
    FieldError {
        field,
        message: message.into(),
    }
}

/// Validates a `device_id`: non-empty, at most [`MAX_DEVICE_ID_LEN`] bytes,
/// and matching `[A-Za-z0-9_-]+`.
pub fn validate_device_id(device_id: &str) -> Result<(), FieldError> {
    if device_id.is_empty() {
        return Err(err("device_id", "device_id must not be empty"));
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(err(
            "device_id",
            format!("device_id must be at most {} characters", MAX_DEVICE_ID_LEN),
        ));
    }
    if !device_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(err(
            "device_id",
            "device_id must match [A-Za-z0-9_-]+",
        ));
    }
    Ok(())
}

/// Validates latitude is within `[-90, 90]`.
pub fn validate_latitude(lat: f64) -> Result<(), FieldError> {
    if lat.is_finite() && (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(err("lat", "lat must be between -90 and 90"))
    }
}

/// Validates longitude is within `[-180, 180]`.
pub fn validate_longitude(lng: f64) -> Result<(), FieldError> {
    if lng.is_finite() && (-180.0..=180.0).contains(&lng) {
        Ok(())
    } else {
        Err(err("lng", "lng must be between -180 and 180"))
    }
}

/// Validates that `timestamp` falls within `[now - max_age, now + max_future]`.
pub fn validate_timestamp_window(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Duration,
    max_future: Duration,
) -> Result<(), FieldError> {
    if timestamp < now - max_age {
        return Err(err("timestamp", "timestamp is older than the allowed maximum age"));
    }
    if timestamp > now + max_future {
        return Err(err("timestamp", "timestamp is further in the future than allowed"));
    }
    Ok(())
}

/// Parses a numeric field that may arrive as a JSON number or a numeric string.
pub fn parse_coordinate(field: &'static str, raw: &str) -> Result<f64, FieldError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| err(field, format!("{} is not a valid number", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_accepts_alnum_dash_underscore() {
        assert!(validate_device_id("phone-01_A").is_ok());
    }

    #[test]
    fn device_id_rejects_empty() {
        assert!(validate_device_id("").is_err());
    }

    #[test]
    fn device_id_rejects_over_length() {
        let long = "a".repeat(MAX_DEVICE_ID_LEN + 1);
        assert!(validate_device_id(&long).is_err());
        let exact = "a".repeat(MAX_DEVICE_ID_LEN);
        assert!(validate_device_id(&exact).is_ok());
    }

    #[test]
    fn device_id_rejects_invalid_chars() {
        assert!(validate_device_id("phone 01").is_err());
        assert!(validate_device_id("phone/01").is_err());
    }

    #[test]
    fn latitude_boundaries() {
        assert!(validate_latitude(90.0).is_ok());
        assert!(validate_latitude(-90.0).is_ok());
        assert!(validate_latitude(90.000001).is_err());
        assert!(validate_latitude(-90.000001).is_err());
        assert!(validate_latitude(f64::NAN).is_err());
    }

    #[test]
    fn longitude_boundaries() {
        assert!(validate_longitude(180.0).is_ok());
        assert!(validate_longitude(-180.0).is_ok());
        assert!(validate_longitude(180.000001).is_err());
    }

    #[test]
    fn timestamp_window_accepts_now() {
        let now = Utc::now();
        assert!(validate_timestamp_window(now, now, Duration::hours(24), Duration::minutes(5)).is_ok());
    }

    #[test]
    fn timestamp_window_boundary_max_age() {
        let now = Utc::now();
        let max_age = Duration::hours(24);
        let exactly_at_bound = now - max_age;
        assert!(validate_timestamp_window(exactly_at_bound, now, max_age, Duration::minutes(5)).is_ok());
        let one_ms_older = exactly_at_bound - Duration::milliseconds(1);
        assert!(validate_timestamp_window(one_ms_older, now, max_age, Duration::minutes(5)).is_err());
    }

    #[test]
    fn timestamp_window_rejects_too_far_future() {
        let now = Utc::now();
        let max_future = Duration::minutes(5);
        let too_far = now + max_future + Duration::milliseconds(1);
        assert!(validate_timestamp_window(too_far, now, Duration::hours(24), max_future).is_err());
    }

    #[test]
    fn parse_coordinate_accepts_numeric_strings() {
        assert_eq!(parse_coordinate("lat", "40.7128").unwrap(), 40.7128);
        assert!(parse_coordinate("lat", "not-a-number").is_err());
    }
}
