//! # Historical Sea-Condition Estimate
//!
//! This module provides a climatological fallback when live forecast data is
//! out of reach: the requested instant lies beyond the provider horizon, or
//! the provider failed, or it had no sample near the requested hour.
//!
//! ## Model Characteristics
//!
//! ### Latitude bands
//! - **Tropics** (|lat| < 10°): calmer, 1.0 m waves and 10 kt wind
//! - **Mid latitudes** (10°–40°): 1.5 m waves and 15 kt wind
//! - **High latitudes** (|lat| > 40°): rougher, 2.5 m waves and 22 kt wind
//!
//! ### Season
//! Boreal winter (December to February) amplifies both wave height and wind
//! speed by [`WINTER_FACTOR`].
//!
//! ### Determinism
//! A small variation (±10 % on magnitudes, a full circle on direction) comes
//! from a `ChaCha8Rng` seeded by the rounded coordinate and the UTC hour, so
//! the same `(lat, lon, datetime)` always produces the same estimate, on any
//! platform and across dependency upgrades.
//!
//! The confidence tag tells callers they are looking at an approximation.

use crate::{Coordinates, ForecastConfidence, ForecastPoint, SeaState};
use chrono::{DateTime, Datelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Multiplier applied to waves and wind in December, January and February
pub const WINTER_FACTOR: f64 = 1.3;

/// Baseline `(wave_height_m, wind_speed_kt)` for a latitude.
pub fn latitude_baseline(lat: f64) -> (f64, f64) {
    let abs_lat = lat.abs();
    if abs_lat < 10.0 {
        (1.0, 10.0)
    } else if abs_lat > 40.0 {
        (2.5, 22.0)
    } else {
        (1.5, 15.0)
    }
}

pub fn is_boreal_winter(at: DateTime<Utc>) -> bool {
    matches!(at.month(), 12 | 1 | 2)
}

/// Estimate conditions at a position and instant without live data.
pub fn historical_estimate(
    lat: f64,
    lon: f64,
    at: DateTime<Utc>,
    confidence: ForecastConfidence,
) -> ForecastPoint {
    let (mut wave, mut wind) = latitude_baseline(lat);
    if is_boreal_winter(at) {
        wave *= WINTER_FACTOR;
        wind *= WINTER_FACTOR;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed(lat, lon, at));
    let wave_height_m = wave * rng.random_range(0.9..1.1);
    let wind_speed_kt = wind * rng.random_range(0.9..1.1);
    let wind_direction_deg = rng.random_range(0.0..360.0);

    ForecastPoint {
        position: Coordinates { lat, lon },
        datetime: at,
        wave_height_m,
        wind_speed_kt,
        wind_direction_deg,
        sea_state: SeaState::from_wave_height(wave_height_m),
        forecast_confidence: confidence,
    }
}

/// Seed from the coordinate at 0.01° resolution and the whole UTC hour.
fn seed(lat: f64, lon: f64, at: DateTime<Utc>) -> u64 {
    let lat_key = (lat * 100.0).round() as i64 as u64;
    let lon_key = (lon * 100.0).round() as i64 as u64;
    let hour_key = at.timestamp().div_euclid(3600) as u64;
    lat_key
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .rotate_left(17)
        ^ lon_key.wrapping_mul(0xC2B2_AE3D_27D4_EB4F).rotate_left(31)
        ^ hour_key.wrapping_mul(0x1656_67B1_9E37_79F9)
}
