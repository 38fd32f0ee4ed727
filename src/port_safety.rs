//! # Port Weather Safety
//!
//! Decides whether a bunkering call at a port falls inside a safe weather
//! window.
//!
//! For each port the hourly forecast for its coordinate is fetched through
//! the same [`ForecastFetcher`] contract the voyage stage uses, then the
//! window `[arrival, arrival + duration]` is assessed:
//!
//! | verdict | rule |
//! |---|---|
//! | Unsafe / High risk | `max_wave > 1.5 m` or `max_wind > 25 kt` |
//! | Excellent | `avg_wave < 0.8 m` and `avg_wind < 15 kt` |
//! | Good | `avg_wave < 1.2 m` and `avg_wind < 20 kt` |
//! | Marginal | anything else within the unsafe bound |
//! | Medium risk | `max_wave >= 1.2 m` or `max_wind >= 20 kt` |
//!
//! When bunkering is not feasible, the 48 hours after arrival are searched
//! for the first run of `duration` consecutive hourly samples that are all
//! within the safe bound.
//!
//! One port's failed fetch never aborts its siblings: it produces a
//! high-risk, infeasible result explaining the failure.

use crate::config::BunkeringConfig;
use crate::forecast::{ForecastFetcher, MS_TO_KNOTS};
use crate::provider::{HourlySample, HourlySeries};
use crate::timeline::hours;
use crate::validation::{check_coordinates, check_non_empty, parse_utc};
use crate::PlannerError;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

/// Longest bunkering window accepted, hours
pub const MAX_BUNKERING_HOURS: u32 = 48;

const EXCELLENT_WAVE_M: f64 = 0.8;
const EXCELLENT_WIND_KT: f64 = 15.0;
const GOOD_WAVE_M: f64 = 1.2;
const GOOD_WIND_KT: f64 = 20.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSafetyRequest {
    pub port_code: String,
    pub port_name: String,
    pub lat: f64,
    pub lon: f64,
    /// ISO-8601 arrival instant
    pub estimated_arrival: String,
    /// Falls back to the configured default when absent
    #[serde(default)]
    pub bunkering_duration_hours: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeatherRisk {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BunkeringConditions {
    Excellent,
    Good,
    Marginal,
    Unsafe,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BunkeringWeather {
    pub arrival_time: DateTime<Utc>,
    pub bunkering_window_hours: u32,
    pub avg_wave_height_m: f64,
    pub max_wave_height_m: f64,
    pub avg_wind_speed_kt: f64,
    pub max_wind_speed_kt: f64,
    pub conditions: BunkeringConditions,
}

/// A safe bunkering window. Every hourly sample from `starts_at` through
/// `starts_at + duration_hours` inclusive is within the limits, the same
/// span an arrival at `starts_at` is assessed over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafeWindow {
    pub starts_at: DateTime<Utc>,
    pub duration_hours: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortSafetyResult {
    pub port_code: String,
    pub port_name: String,
    pub bunkering_feasible: bool,
    pub weather_risk: WeatherRisk,
    /// Absent only when no forecast could be obtained for the port
    pub weather_during_bunkering: Option<BunkeringWeather>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_good_window: Option<SafeWindow>,
}

/// A port call that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct PortCall {
    pub(crate) code: String,
    pub(crate) name: String,
    pub(crate) lat: f64,
    pub(crate) lon: f64,
    pub(crate) arrival: DateTime<Utc>,
    pub(crate) duration_hours: u32,
}

/// Resolve the window length, applying the configured default, and hold it
/// to `1..=MAX_BUNKERING_HOURS`.
pub(crate) fn bunkering_duration(
    field: &str,
    requested: Option<u32>,
    config: &BunkeringConfig,
) -> Result<u32, PlannerError> {
    let duration_hours = requested.unwrap_or(config.default_duration_hours);
    if duration_hours == 0 || duration_hours > MAX_BUNKERING_HOURS {
        return Err(PlannerError::invalid(format!(
            "{field}.bunkering_duration_hours {duration_hours} outside [1, {MAX_BUNKERING_HOURS}]"
        )));
    }
    Ok(duration_hours)
}

fn validate(request: &PortSafetyRequest, idx: usize, config: &BunkeringConfig) -> Result<PortCall, PlannerError> {
    let field = format!("ports[{idx}]");
    check_coordinates(&field, request.lat, request.lon)?;
    let arrival = parse_utc(&format!("{field}.estimated_arrival"), &request.estimated_arrival)?;
    let duration_hours = bunkering_duration(&field, request.bunkering_duration_hours, config)?;
    Ok(PortCall {
        code: request.port_code.clone(),
        name: request.port_name.clone(),
        lat: request.lat,
        lon: request.lon,
        arrival,
        duration_hours,
    })
}

/// Evaluate every port, preserving input order.
///
/// All requests are validated before any forecast is fetched; the only
/// error returned is `InvalidInput`.
pub async fn evaluate(
    fetcher: &ForecastFetcher,
    config: &BunkeringConfig,
    requests: &[PortSafetyRequest],
) -> Result<Vec<PortSafetyResult>, PlannerError> {
    check_non_empty("ports", requests)?;
    let calls = requests
        .iter()
        .enumerate()
        .map(|(idx, r)| validate(r, idx, config))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(evaluate_calls(fetcher, config, calls).await)
}

/// Evaluate already-validated calls with bounded concurrency, in order.
pub(crate) async fn evaluate_calls(
    fetcher: &ForecastFetcher,
    config: &BunkeringConfig,
    calls: Vec<PortCall>,
) -> Vec<PortSafetyResult> {
    let concurrency = fetcher.config().max_concurrent_requests.max(1);
    stream::iter(calls)
        .map(|call| evaluate_call(fetcher, config, call))
        .buffered(concurrency)
        .collect()
        .await
}

async fn evaluate_call(fetcher: &ForecastFetcher, config: &BunkeringConfig, call: PortCall) -> PortSafetyResult {
    let outcome = match fetcher.fetch_series(call.lat, call.lon).await {
        Ok(series) => assess(&call, &series, config),
        Err(err) => Err(err),
    };
    outcome.unwrap_or_else(|err| {
        tracing::warn!(port = %call.code, error = %err, "port weather evaluation failed");
        failed_result(&call, &err)
    })
}

fn failed_result(call: &PortCall, err: &PlannerError) -> PortSafetyResult {
    PortSafetyResult {
        port_code: call.code.clone(),
        port_name: call.name.clone(),
        bunkering_feasible: false,
        weather_risk: WeatherRisk::High,
        weather_during_bunkering: None,
        recommendation: format!(
            "Weather data unavailable for {} ({}): {err}. Treat bunkering as high risk until a forecast can be confirmed.",
            call.name, call.code
        ),
        next_good_window: None,
    }
}

fn assess(call: &PortCall, series: &HourlySeries, config: &BunkeringConfig) -> Result<PortSafetyResult, PlannerError> {
    let window_end = call.arrival + Duration::hours(i64::from(call.duration_hours));
    let mut window: Vec<&HourlySample> = series.between(call.arrival, window_end).collect();
    if window.is_empty() {
        let closest = series
            .closest(call.arrival)
            .ok_or_else(|| PlannerError::StructuralResponse("forecast contains no hourly samples".into()))?;
        tracing::debug!(port = %call.code, sample = %closest.time, "no sample inside window, using closest");
        window.push(closest);
    }

    let weather = summarize(call, &window, config);
    let feasible = is_feasible(weather.max_wave_height_m, weather.max_wind_speed_kt, config);
    let risk = weather_risk(weather.max_wave_height_m, weather.max_wind_speed_kt, config);
    let next_good_window = if feasible {
        None
    } else {
        find_next_window(series, call.arrival, call.duration_hours, config)
    };

    Ok(PortSafetyResult {
        port_code: call.code.clone(),
        port_name: call.name.clone(),
        bunkering_feasible: feasible,
        weather_risk: risk,
        recommendation: recommendation(call, &weather, feasible, next_good_window.as_ref(), config),
        weather_during_bunkering: Some(weather),
        next_good_window,
    })
}

fn summarize(call: &PortCall, window: &[&HourlySample], config: &BunkeringConfig) -> BunkeringWeather {
    let n = window.len() as f64;
    let waves = window.iter().map(|s| s.wave_height_m);
    let winds = window.iter().map(|s| s.wind_speed_ms * MS_TO_KNOTS);

    let avg_wave = waves.clone().sum::<f64>() / n;
    let max_wave = waves.fold(0.0, f64::max);
    let avg_wind = winds.clone().sum::<f64>() / n;
    let max_wind = winds.fold(0.0, f64::max);

    BunkeringWeather {
        arrival_time: call.arrival,
        bunkering_window_hours: call.duration_hours,
        avg_wave_height_m: avg_wave,
        max_wave_height_m: max_wave,
        avg_wind_speed_kt: avg_wind,
        max_wind_speed_kt: max_wind,
        conditions: conditions(avg_wave, max_wave, avg_wind, max_wind, config),
    }
}

/// Bunkering is feasible iff both window maxima stay within the limits.
pub fn is_feasible(max_wave_m: f64, max_wind_kt: f64, config: &BunkeringConfig) -> bool {
    max_wave_m <= config.max_wave_height_m && max_wind_kt <= config.max_wind_speed_kt
}

pub fn conditions(
    avg_wave_m: f64,
    max_wave_m: f64,
    avg_wind_kt: f64,
    max_wind_kt: f64,
    config: &BunkeringConfig,
) -> BunkeringConditions {
    if !is_feasible(max_wave_m, max_wind_kt, config) {
        BunkeringConditions::Unsafe
    } else if avg_wave_m < EXCELLENT_WAVE_M && avg_wind_kt < EXCELLENT_WIND_KT {
        BunkeringConditions::Excellent
    } else if avg_wave_m < GOOD_WAVE_M && avg_wind_kt < GOOD_WIND_KT {
        BunkeringConditions::Good
    } else {
        BunkeringConditions::Marginal
    }
}

pub fn weather_risk(max_wave_m: f64, max_wind_kt: f64, config: &BunkeringConfig) -> WeatherRisk {
    if !is_feasible(max_wave_m, max_wind_kt, config) {
        WeatherRisk::High
    } else if max_wave_m >= GOOD_WAVE_M || max_wind_kt >= GOOD_WIND_KT {
        WeatherRisk::Medium
    } else {
        WeatherRisk::Low
    }
}

/// First run of consecutive hourly samples covering `duration_hours` hours
/// (`duration_hours + 1` samples, both ends included), all within the safe
/// bound, starting no earlier than `arrival` and ending within the search
/// horizon.
pub fn find_next_window(
    series: &HourlySeries,
    arrival: DateTime<Utc>,
    duration_hours: u32,
    config: &BunkeringConfig,
) -> Option<SafeWindow> {
    let horizon_end = arrival + hours(f64::from(config.search_horizon_hours));
    let needed = duration_hours.max(1) as usize + 1;

    let mut run_start: Option<DateTime<Utc>> = None;
    let mut run_len = 0usize;
    let mut previous: Option<DateTime<Utc>> = None;

    for sample in series.between(arrival, horizon_end) {
        let safe = is_feasible(sample.wave_height_m, sample.wind_speed_ms * MS_TO_KNOTS, config);
        let contiguous = previous.is_some_and(|prev| sample.time - prev == Duration::hours(1));
        previous = Some(sample.time);

        if !safe {
            run_start = None;
            run_len = 0;
            continue;
        }
        if run_start.is_none() || !contiguous {
            run_start = Some(sample.time);
            run_len = 0;
        }
        run_len += 1;
        if run_len == needed {
            return run_start.map(|starts_at| SafeWindow {
                starts_at,
                duration_hours,
            });
        }
    }
    None
}

fn recommendation(
    call: &PortCall,
    weather: &BunkeringWeather,
    feasible: bool,
    next: Option<&SafeWindow>,
    config: &BunkeringConfig,
) -> String {
    if feasible {
        return match weather.conditions {
            BunkeringConditions::Excellent => format!(
                "Excellent conditions for bunkering at {}. Proceed as planned.",
                call.name
            ),
            BunkeringConditions::Good => format!(
                "Good conditions for bunkering at {}. Standard precautions apply.",
                call.name
            ),
            _ => format!(
                "Marginal conditions for bunkering at {}. Monitor the forecast closely and keep a contingency plan ready.",
                call.name
            ),
        };
    }

    let reason = format!(
        "Bunkering not recommended at {} on arrival: waves up to {:.1} m and wind up to {:.0} kt exceed the {:.1} m / {:.0} kt limits.",
        call.name,
        weather.max_wave_height_m,
        weather.max_wind_speed_kt,
        config.max_wave_height_m,
        config.max_wind_speed_kt
    );
    match next {
        Some(window) => format!(
            "{reason} Next safe window opens {} for {} hours.",
            window.starts_at.format("%Y-%m-%d %H:%M UTC"),
            window.duration_hours
        ),
        None => format!(
            "{reason} No safe {}-hour window within {} hours of arrival; consider an alternative port or a later arrival.",
            call.duration_hours, config.search_horizon_hours
        ),
    }
}
