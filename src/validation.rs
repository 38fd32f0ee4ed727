//! Input checks shared by every entry point. All of them run before any
//! network call is made.

use crate::PlannerError;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;

/// Parse an ISO-8601 instant into UTC.
///
/// Accepts RFC 3339 (`2024-12-25T08:00:00Z`, `2024-12-25T16:00:00+08:00`)
/// and offset-less `YYYY-MM-DDTHH:MM[:SS]`, which is taken as UTC.
pub fn parse_utc(field: &str, value: &str) -> Result<DateTime<Utc>, PlannerError> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(PlannerError::invalid(format!(
        "{field} is not an ISO-8601 datetime: {value:?}"
    )))
}

pub fn check_coordinates(field: &str, lat: f64, lon: f64) -> Result<(), PlannerError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(PlannerError::invalid(format!(
            "{field} latitude {lat} outside [-90, 90]"
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(PlannerError::invalid(format!(
            "{field} longitude {lon} outside [-180, 180]"
        )));
    }
    Ok(())
}

pub fn check_in_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), PlannerError> {
    if !value.is_finite() || value < min || value > max {
        return Err(PlannerError::invalid(format!(
            "{field} {value} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

pub fn check_positive(field: &str, value: f64) -> Result<(), PlannerError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PlannerError::invalid(format!(
            "{field} must be a positive number, got {value}"
        )));
    }
    Ok(())
}

/// Headings live on the half-open circle `[0, 360)`.
pub fn check_heading(field: &str, value: f64) -> Result<(), PlannerError> {
    if !value.is_finite() || !(0.0..360.0).contains(&value) {
        return Err(PlannerError::invalid(format!(
            "{field} {value} outside [0, 360)"
        )));
    }
    Ok(())
}

pub fn check_non_empty<T>(field: &str, items: &[T]) -> Result<(), PlannerError> {
    if items.is_empty() {
        return Err(PlannerError::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Every named fuel quantity must be a finite, non-negative tonnage.
pub fn check_fuel_quantities(field: &str, fuels: &BTreeMap<String, f64>) -> Result<(), PlannerError> {
    for (fuel, qty) in fuels {
        if !qty.is_finite() || *qty < 0.0 {
            return Err(PlannerError::invalid(format!(
                "{field}[{fuel}] must be a non-negative quantity, got {qty}"
            )));
        }
    }
    Ok(())
}
