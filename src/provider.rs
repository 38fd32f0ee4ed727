//! # Marine Forecast Provider
//!
//! The upstream provider answers one question: for a coordinate, what are
//! the hourly wave height, 10 m wind speed and 10 m wind direction over the
//! next N days? One call therefore serves every requested instant at that
//! coordinate.
//!
//! ## Wire format
//! An Open-Meteo style HTTP GET returning parallel hourly arrays, all UTC:
//! ```json
//! {
//!   "hourly": {
//!     "time": ["2024-12-25T08:00", ...],
//!     "wave_height": [1.2, ...],
//!     "wind_speed_10m": [7.5, ...],
//!     "wind_direction_10m": [220.0, ...]
//!   }
//! }
//! ```
//! Wind speed is requested in m/s. A missing array, mismatched array
//! lengths or an unparseable timestamp is a structural error and is never
//! retried. Individual `null` entries only drop that hour.
//!
//! Providers are injected as `Arc<dyn ForecastProvider>`; there is no
//! process-wide client.

use crate::config::ProviderConfig;
use crate::PlannerError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

/// One hourly provider sample, still in provider units.
#[derive(Clone, Debug, PartialEq)]
pub struct HourlySample {
    pub time: DateTime<Utc>,
    pub wave_height_m: f64,
    pub wind_speed_ms: f64,
    pub wind_direction_deg: f64,
}

/// Hourly series for one coordinate, sorted by time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HourlySeries {
    pub samples: Vec<HourlySample>,
}

impl HourlySeries {
    pub fn new(mut samples: Vec<HourlySample>) -> Self {
        samples.sort_by_key(|s| s.time);
        HourlySeries { samples }
    }

    /// Sample closest to `at`, if one lies within `tolerance`.
    /// Ties go to the earlier sample.
    pub fn nearest(&self, at: DateTime<Utc>, tolerance: chrono::Duration) -> Option<&HourlySample> {
        self.closest(at)
            .filter(|s| (s.time - at).abs() <= tolerance)
    }

    /// Sample closest to `at` with no tolerance.
    pub fn closest(&self, at: DateTime<Utc>) -> Option<&HourlySample> {
        self.samples
            .iter()
            .min_by_key(|s| ((s.time - at).abs(), s.time))
    }

    /// Samples with `start <= time <= end`.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> impl Iterator<Item = &HourlySample> {
        self.samples
            .iter()
            .filter(move |s| s.time >= start && s.time <= end)
    }
}

/// Source of hourly marine forecasts.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Fetch the hourly series for a coordinate covering `days` days.
    async fn hourly_forecast(&self, lat: f64, lon: f64, days: u32) -> Result<HourlySeries, PlannerError>;
}

/// Open-Meteo marine forecast client.
pub struct OpenMeteoProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenMeteoProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, PlannerError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PlannerError::invalid(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: ProviderConfig) -> Self {
        OpenMeteoProvider { client, config }
    }

    fn url(&self, lat: f64, lon: f64, days: u32) -> String {
        let separator = if self.config.base_url.contains('?') { "&" } else { "?" };
        format!(
            "{}{}latitude={:.2}&longitude={:.2}&hourly=wave_height,wind_speed_10m,wind_direction_10m&wind_speed_unit=ms&timezone=UTC&forecast_days={}",
            self.config.base_url, separator, lat, lon, days
        )
    }
}

#[async_trait]
impl ForecastProvider for OpenMeteoProvider {
    async fn hourly_forecast(&self, lat: f64, lon: f64, days: u32) -> Result<HourlySeries, PlannerError> {
        let url = self.url(lat, lon, days);
        tracing::debug!(%url, "requesting marine forecast");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                PlannerError::UpstreamUnavailable(format!("HTTP {status}"))
            } else {
                PlannerError::StructuralResponse(format!("HTTP {status}"))
            });
        }

        let body = response.text().await?;
        parse_hourly(&body)
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: Option<OpenMeteoHourly>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Option<Vec<String>>,
    wave_height: Option<Vec<Option<f64>>>,
    wind_speed_10m: Option<Vec<Option<f64>>>,
    wind_direction_10m: Option<Vec<Option<f64>>>,
}

/// Decode a provider body into an hourly series.
pub fn parse_hourly(body: &str) -> Result<HourlySeries, PlannerError> {
    let payload: OpenMeteoResponse = serde_json::from_str(body)
        .map_err(|e| PlannerError::StructuralResponse(format!("undecodable body: {e}")))?;
    let hourly = payload
        .hourly
        .ok_or_else(|| missing("hourly"))?;
    let times = hourly.time.ok_or_else(|| missing("time"))?;
    let waves = hourly.wave_height.ok_or_else(|| missing("wave_height"))?;
    let speeds = hourly.wind_speed_10m.ok_or_else(|| missing("wind_speed_10m"))?;
    let directions = hourly
        .wind_direction_10m
        .ok_or_else(|| missing("wind_direction_10m"))?;

    let n = times.len();
    if waves.len() != n || speeds.len() != n || directions.len() != n {
        return Err(PlannerError::StructuralResponse(format!(
            "hourly arrays differ in length (time {n}, wave {}, wind {}, direction {})",
            waves.len(),
            speeds.len(),
            directions.len()
        )));
    }

    let mut samples = Vec::with_capacity(n);
    for (i, raw) in times.iter().enumerate() {
        let time = parse_provider_time(raw)?;
        if let (Some(wave), Some(speed), Some(direction)) = (waves[i], speeds[i], directions[i]) {
            samples.push(HourlySample {
                time,
                wave_height_m: wave.max(0.0),
                wind_speed_ms: speed.max(0.0),
                wind_direction_deg: direction.rem_euclid(360.0),
            });
        }
    }

    Ok(HourlySeries::new(samples))
}

fn missing(field: &str) -> PlannerError {
    PlannerError::StructuralResponse(format!("response missing hourly.{field}"))
}

fn parse_provider_time(raw: &str) -> Result<DateTime<Utc>, PlannerError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map(|naive| naive.and_utc())
        .map_err(|_| PlannerError::StructuralResponse(format!("bad timestamp {raw:?}")))
}
