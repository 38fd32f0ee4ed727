//! # Voyage Weather Core Library
//!
//! This library plans vessel fuel consumption and bunkering feasibility against
//! forecast sea conditions along a maritime route. It is the algorithmic core
//! behind a voyage-planning service: route geometry, port lookup and result
//! presentation all live elsewhere and talk to this crate through plain,
//! validated request types.
//!
//! ## Pipeline
//!
//! ```text
//! waypoints ──► timeline ──► forecast ──► consumption
//!                               │
//!                               └──────► port safety
//! ```
//!
//! 1. **Timeline**: interpolate vessel positions along a multi-leg route at a
//!    fixed sampling interval ([`timeline`])
//! 2. **Forecast**: fetch wave/wind conditions for every position, with
//!    live data inside the provider horizon and a deterministic historical
//!    estimate outside it or on failure ([`forecast`], [`fallback`])
//! 3. **Consumption**: turn the forecast series into a weather-adjusted fuel
//!    estimate with severity alerts ([`consumption`])
//! 4. **Port safety**: decide whether a bunkering window at a destination
//!    port is safe, and find the next safe window when it is not
//!    ([`port_safety`])
//!
//! [`planner::VoyagePlanner`] wires the four stages around one injected
//! [`provider::ForecastProvider`].
//!
//! ## Core Types
//!
//! The types shared between stages are defined here:
//! - [`Waypoint`] / [`Coordinates`]: plain positions in decimal degrees
//! - [`TimelinePosition`]: one interpolated vessel position in time
//! - [`ForecastPoint`]: conditions at a position, tagged with [`ForecastConfidence`]
//! - [`SeaState`]: categorical classification of wave height

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod backoff;
pub mod config;
pub mod consumption;
pub mod error;
pub mod fallback;
pub mod forecast;
pub mod planner;
pub mod port_safety;
pub mod provider;
pub mod timeline;
pub mod validation;

#[cfg(test)]
mod tests;

pub use error::PlannerError;

/// Route waypoint in decimal degrees.
///
/// Latitude must lie in `[-90, 90]` and longitude in `[-180, 180]`; entry
/// points reject anything else with [`PlannerError::InvalidInput`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
}

/// A bare position attached to forecast points and alerts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl From<Waypoint> for Coordinates {
    fn from(wp: Waypoint) -> Self {
        Coordinates {
            lat: wp.lat,
            lon: wp.lon,
        }
    }
}

/// One interpolated vessel position on the voyage timeline.
///
/// Positions are produced in time order. Across a timeline,
/// `distance_from_start_nm` never decreases and the first position always
/// sits at zero distance on the departure instant.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use voyage_weather_lib::TimelinePosition;
///
/// let start = TimelinePosition {
///     lat: 1.29,
///     lon: 103.85,
///     datetime: Utc.with_ymd_and_hms(2024, 12, 25, 8, 0, 0).unwrap(),
///     distance_from_start_nm: 0.0,
///     segment_index: 0,
/// };
///
/// assert_eq!(start.distance_from_start_nm, 0.0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelinePosition {
    pub lat: f64,
    pub lon: f64,
    /// UTC instant the vessel is expected at this position
    pub datetime: DateTime<Utc>,
    /// Great-circle distance sailed since departure, in nautical miles
    pub distance_from_start_nm: f64,
    /// 0-based index of the route leg this position lies on
    pub segment_index: usize,
}

/// Douglas-style sea state derived from significant wave height.
///
/// The classification is a pure step function of wave height:
///
/// | wave height (m) | state |
/// |---|---|
/// | < 0.5 | Calm |
/// | < 1.25 | Slight |
/// | < 2.5 | Moderate |
/// | < 4.0 | Rough |
/// | < 6.0 | Very Rough |
/// | ≥ 6.0 | High |
///
/// Variants are ordered by severity so thresholds can be compared directly.
///
/// # Example
/// ```
/// use voyage_weather_lib::SeaState;
///
/// assert_eq!(SeaState::from_wave_height(0.49), SeaState::Calm);
/// assert_eq!(SeaState::from_wave_height(1.25), SeaState::Moderate);
/// assert!(SeaState::from_wave_height(4.5) >= SeaState::Rough);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeaState {
    Calm,
    Slight,
    Moderate,
    Rough,
    #[serde(rename = "Very Rough")]
    VeryRough,
    High,
}

impl SeaState {
    pub fn from_wave_height(wave_height_m: f64) -> Self {
        match wave_height_m {
            h if h < 0.5 => SeaState::Calm,
            h if h < 1.25 => SeaState::Slight,
            h if h < 2.5 => SeaState::Moderate,
            h if h < 4.0 => SeaState::Rough,
            h if h < 6.0 => SeaState::VeryRough,
            _ => SeaState::High,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SeaState::Calm => "Calm",
            SeaState::Slight => "Slight",
            SeaState::Moderate => "Moderate",
            SeaState::Rough => "Rough",
            SeaState::VeryRough => "Very Rough",
            SeaState::High => "High",
        }
    }
}

/// How much a forecast value can be trusted.
///
/// - `High`: a live provider sample within the match tolerance
/// - `Medium`: historical estimate because the instant is beyond the
///   provider horizon
/// - `Low`: historical estimate because the live fetch failed or had no
///   matching sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastConfidence {
    High,
    Medium,
    Low,
}

/// Marine conditions at one requested position and instant.
///
/// `sea_state` is always `SeaState::from_wave_height(wave_height_m)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub position: Coordinates,
    pub datetime: DateTime<Utc>,
    pub wave_height_m: f64,
    pub wind_speed_kt: f64,
    /// Direction the wind blows from, degrees true in `[0, 360)`
    pub wind_direction_deg: f64,
    pub sea_state: SeaState,
    pub forecast_confidence: ForecastConfidence,
}
