//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! voyage-weather.toml file. It centralizes the forecast provider settings,
//! the sampling interval, the bunkering safety thresholds and the calibratable
//! consumption model.
//!
//! Every section is optional in the file; missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file name, resolved relative to the working directory
pub const CONFIG_FILE: &str = "voyage-weather.toml";

/// Planner configuration loaded from voyage-weather.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Upstream marine forecast provider
    pub provider: ProviderConfig,
    /// Position timeline generation
    pub timeline: TimelineConfig,
    /// Bunkering safety thresholds
    pub bunkering: BunkeringConfig,
    /// Weather multiplier model
    pub consumption: ConsumptionModel,
}

/// Marine forecast provider configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Hourly marine forecast endpoint (Open-Meteo compatible)
    pub base_url: String,
    /// Forecast horizon requested from the provider, in days.
    /// Positions further out than this use the historical estimate.
    pub forecast_days: u32,
    /// Per-attempt timeout in seconds
    pub request_timeout_secs: u64,
    /// Total attempts per coordinate, including the first
    pub max_attempts: u32,
    /// First retry delay; doubles on each further retry
    pub backoff_base_ms: u64,
    /// Upper bound on concurrent outbound calls within one fetch
    pub max_concurrent_requests: usize,
    /// A sample matches a requested instant if within this many minutes
    pub match_tolerance_minutes: i64,
}

/// Timeline sampling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Hours between interpolated positions when a request gives none
    pub sampling_interval_hours: f64,
}

/// Bunkering safety thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BunkeringConfig {
    /// Window length when a port request gives none
    pub default_duration_hours: u32,
    /// Window maxima above this wave height make bunkering unsafe
    pub max_wave_height_m: f64,
    /// Window maxima above this wind speed make bunkering unsafe
    pub max_wind_speed_kt: f64,
    /// How far past arrival to look for the next safe window
    pub search_horizon_hours: u32,
}

/// Calibratable weather multiplier model.
///
/// The wave factors are indexed by sea state, Calm through High. Wind
/// scales the wave factor up for a headwind and down, by at most
/// `following_wind_coefficient`, for a following wind.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumptionModel {
    /// Multiplier per sea state: Calm, Slight, Moderate, Rough, Very Rough, High
    pub wave_factors: [f64; 6],
    /// Extra consumption for a dead headwind at the reference speed
    pub headwind_coefficient: f64,
    /// Saving for a dead following wind at the reference speed
    pub following_wind_coefficient: f64,
    /// Wind speed at which the wind term reaches full effect
    pub wind_reference_kt: f64,
    /// Hard cap on any single point's multiplier
    pub max_multiplier: f64,
    /// Wind speed that raises a warning alert
    pub warning_wind_kt: f64,
    /// Wind speed that raises a severe alert
    pub severe_wind_kt: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://marine-api.open-meteo.com/v1/marine".to_string(),
            forecast_days: 16,
            request_timeout_secs: 12,
            max_attempts: 3,
            backoff_base_ms: 1000,
            max_concurrent_requests: 6,
            match_tolerance_minutes: 60,
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        TimelineConfig {
            sampling_interval_hours: 12.0,
        }
    }
}

impl Default for BunkeringConfig {
    fn default() -> Self {
        BunkeringConfig {
            default_duration_hours: 8,
            max_wave_height_m: 1.5,
            max_wind_speed_kt: 25.0,
            search_horizon_hours: 48,
        }
    }
}

impl Default for ConsumptionModel {
    fn default() -> Self {
        ConsumptionModel {
            wave_factors: [1.0, 1.05, 1.15, 1.35, 1.6, 1.9],
            headwind_coefficient: 0.20,
            following_wind_coefficient: 0.05,
            wind_reference_kt: 25.0,
            max_multiplier: 2.0,
            warning_wind_kt: 30.0,
            severe_wind_kt: 40.0,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.forecast_days))
    }
}

impl Config {
    /// Load configuration from voyage-weather.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded planner configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        tracing::info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }
}
