//! # Marine Forecast Fetching
//!
//! Resolves a list of `(lat, lon, datetime)` queries into one
//! [`ForecastPoint`] each, in input order.
//!
//! ## Data Processing Pipeline
//! 1. **Validate**: every coordinate, before any network call
//! 2. **Classify**: queries more than the provider horizon (16 days) away
//!    from now get a `medium` confidence historical estimate and no call
//! 3. **Group**: the rest are grouped by coordinate rounded to 0.01° and by
//!    6-hour UTC window (`floor(hour / 6) * 6`)
//! 4. **Fetch**: one hourly series per unique rounded coordinate, fanned out
//!    with bounded concurrency and deduplicated through an in-flight map
//! 5. **Match**: each query takes the nearest hourly sample within ±1 h
//!    (`high` confidence); no match or a failed fetch degrades that query
//!    alone to a `low` confidence historical estimate
//!
//! ## Error Handling
//! - **Transient failures** (network, timeout, HTTP 5xx/429) are retried
//!   with exponential backoff, see [`crate::backoff`]
//! - **Structural failures** (missing arrays, bad JSON) are not retried
//! - Neither aborts the batch; only invalid input is returned as an error
//!
//! The in-flight map lives for one `fetch` call. Dropping the returned
//! future cancels every outstanding upstream call.

use crate::backoff::RetryPolicy;
use crate::config::ProviderConfig;
use crate::fallback::historical_estimate;
use crate::provider::{ForecastProvider, HourlySample, HourlySeries};
use crate::validation::{check_coordinates, check_non_empty};
use crate::{Coordinates, ForecastConfidence, ForecastPoint, PlannerError, SeaState, TimelinePosition};
use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Metres per second to knots
pub const MS_TO_KNOTS: f64 = 1.944;

/// Hours covered by one grouping window
const WINDOW_HOURS: u32 = 6;

/// One position and instant to forecast.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastQuery {
    pub lat: f64,
    pub lon: f64,
    pub datetime: DateTime<Utc>,
}

impl From<&TimelinePosition> for ForecastQuery {
    fn from(pos: &TimelinePosition) -> Self {
        ForecastQuery {
            lat: pos.lat,
            lon: pos.lon,
            datetime: pos.datetime,
        }
    }
}

/// Coordinate rounded to 0.01°, stored as hundredths so it can be hashed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordKey {
    lat_centi: i32,
    lon_centi: i32,
}

impl CoordKey {
    pub fn new(lat: f64, lon: f64) -> Self {
        CoordKey {
            lat_centi: (lat * 100.0).round() as i32,
            lon_centi: (lon * 100.0).round() as i32,
        }
    }

    pub fn lat(&self) -> f64 {
        f64::from(self.lat_centi) / 100.0
    }

    pub fn lon(&self) -> f64 {
        f64::from(self.lon_centi) / 100.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct WindowKey {
    coord: CoordKey,
    window_start: DateTime<Utc>,
}

/// Start of the 6-hour UTC window containing `at`.
pub fn window_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let hour_floor = at.duration_trunc(Duration::hours(1)).unwrap_or(at);
    let offset = hour_floor.hour() % WINDOW_HOURS;
    hour_floor - Duration::hours(i64::from(offset))
}

type SharedSeries = Result<Arc<HourlySeries>, PlannerError>;

/// In-flight request map: concurrent lookups of one coordinate share a
/// single upstream call and its result.
#[derive(Default)]
pub struct InFlight {
    entries: DashMap<CoordKey, Arc<OnceCell<SharedSeries>>>,
}

impl InFlight {
    pub async fn get_or_fetch<F, Fut>(&self, key: CoordKey, fetch: F) -> SharedSeries
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SharedSeries>,
    {
        // Clone the cell out so no map guard is held across the await
        let cell = self.entries.entry(key).or_default().clone();
        if cell.initialized() {
            tracing::debug!(lat = key.lat(), lon = key.lon(), "in-flight cache hit");
        }
        cell.get_or_init(fetch).await.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fetches marine forecasts through an injected provider.
#[derive(Clone)]
pub struct ForecastFetcher {
    provider: Arc<dyn ForecastProvider>,
    config: ProviderConfig,
}

impl ForecastFetcher {
    pub fn new(provider: Arc<dyn ForecastProvider>, config: ProviderConfig) -> Self {
        ForecastFetcher { provider, config }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Fetch the hourly series for one coordinate with per-attempt timeout
    /// and retry on transient failures.
    pub async fn fetch_series(&self, lat: f64, lon: f64) -> Result<HourlySeries, PlannerError> {
        let policy = RetryPolicy::from_config(&self.config);
        let timeout = self.config.request_timeout();
        let days = self.config.forecast_days;
        let label = format!("{lat:.2},{lon:.2}");

        policy
            .run(&label, |attempt| async move {
                tracing::debug!(lat, lon, attempt, "fetching hourly marine forecast");
                match tokio::time::timeout(timeout, self.provider.hourly_forecast(lat, lon, days)).await {
                    Ok(result) => result,
                    Err(_) => Err(PlannerError::UpstreamUnavailable(format!(
                        "no response within {}s",
                        timeout.as_secs()
                    ))),
                }
            })
            .await
    }

    /// Forecast every query, in input order.
    ///
    /// `now` anchors the horizon check; `None` uses the current time.
    pub async fn fetch(
        &self,
        queries: &[ForecastQuery],
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForecastPoint>, PlannerError> {
        check_non_empty("positions", queries)?;
        for (idx, q) in queries.iter().enumerate() {
            check_coordinates(&format!("positions[{idx}]"), q.lat, q.lon)?;
        }

        let now = now.unwrap_or_else(Utc::now);
        let horizon = self.config.horizon();
        let tolerance = Duration::minutes(self.config.match_tolerance_minutes);

        let mut results: Vec<Option<ForecastPoint>> = vec![None; queries.len()];
        let mut groups: BTreeMap<WindowKey, Vec<usize>> = BTreeMap::new();
        for (idx, q) in queries.iter().enumerate() {
            if (q.datetime - now).abs() > horizon {
                results[idx] = Some(historical_estimate(q.lat, q.lon, q.datetime, ForecastConfidence::Medium));
                continue;
            }
            let key = WindowKey {
                coord: CoordKey::new(q.lat, q.lon),
                window_start: window_start(q.datetime),
            };
            groups.entry(key).or_default().push(idx);
        }

        let in_flight = InFlight::default();
        let fetched: Vec<(WindowKey, SharedSeries)> = stream::iter(groups.keys().copied())
            .map(|key| {
                let in_flight = &in_flight;
                async move {
                    let series = in_flight
                        .get_or_fetch(key.coord, || async move {
                            self.fetch_series(key.coord.lat(), key.coord.lon())
                                .await
                                .map(Arc::new)
                        })
                        .await;
                    (key, series)
                }
            })
            .buffer_unordered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;

        tracing::debug!(
            queries = queries.len(),
            windows = groups.len(),
            coordinates = in_flight.len(),
            "forecast fetch complete"
        );

        for (key, series) in &fetched {
            let Some(indices) = groups.get(key) else {
                continue;
            };
            for &idx in indices {
                let q = &queries[idx];
                let point = match series {
                    Ok(series) => match series.nearest(q.datetime, tolerance) {
                        Some(sample) => live_point(q, sample),
                        None => {
                            tracing::warn!(
                                lat = q.lat,
                                lon = q.lon,
                                datetime = %q.datetime,
                                "no hourly sample near requested time, using historical estimate"
                            );
                            historical_estimate(q.lat, q.lon, q.datetime, ForecastConfidence::Low)
                        }
                    },
                    Err(err) => {
                        tracing::warn!(
                            lat = q.lat,
                            lon = q.lon,
                            error = %err,
                            "forecast fetch failed, using historical estimate"
                        );
                        historical_estimate(q.lat, q.lon, q.datetime, ForecastConfidence::Low)
                    }
                };
                results[idx] = Some(point);
            }
        }

        Ok(results
            .into_iter()
            .zip(queries)
            .map(|(point, q)| {
                point.unwrap_or_else(|| historical_estimate(q.lat, q.lon, q.datetime, ForecastConfidence::Low))
            })
            .collect())
    }
}

/// Build a `high` confidence point from a live sample.
fn live_point(q: &ForecastQuery, sample: &HourlySample) -> ForecastPoint {
    ForecastPoint {
        position: Coordinates { lat: q.lat, lon: q.lon },
        datetime: q.datetime,
        wave_height_m: sample.wave_height_m,
        wind_speed_kt: sample.wind_speed_ms * MS_TO_KNOTS,
        wind_direction_deg: sample.wind_direction_deg,
        sea_state: SeaState::from_wave_height(sample.wave_height_m),
        forecast_confidence: ForecastConfidence::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{hourly_series, ScriptedProvider};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn fetcher(provider: Arc<ScriptedProvider>) -> ForecastFetcher {
        ForecastFetcher::new(provider, ProviderConfig::default())
    }

    fn steady(wave: f64, wind_ms: f64) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(move |_, _| {
            Ok(hourly_series(now(), 16 * 24, |_| (wave, wind_ms, 90.0)))
        }))
    }

    #[test]
    fn window_start_floors_to_six_hours() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 11, 59, 59).unwrap();
        assert_eq!(window_start(at), Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap());
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(window_start(at), Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn coord_key_rounds_to_hundredths() {
        assert_eq!(CoordKey::new(1.294, 103.851), CoordKey::new(1.29, 103.85));
        assert_ne!(CoordKey::new(1.296, 103.85), CoordKey::new(1.29, 103.85));
        assert_eq!(CoordKey::new(-33.865, 151.209).lat(), -33.87);
    }

    #[tokio::test(start_paused = true)]
    async fn live_samples_are_high_confidence_in_knots() {
        let provider = steady(1.8, 10.0);
        let query = ForecastQuery { lat: 1.29, lon: 103.85, datetime: now() + Duration::hours(5) };
        let points = fetcher(provider).fetch(&[query], Some(now())).await.unwrap();

        assert_eq!(points.len(), 1);
        let p = &points[0];
        assert_eq!(p.forecast_confidence, ForecastConfidence::High);
        assert_eq!(p.wave_height_m, 1.8);
        assert!((p.wind_speed_kt - 19.44).abs() < 1e-9);
        assert_eq!(p.sea_state, SeaState::Moderate);
        assert_eq!(p.position, Coordinates { lat: 1.29, lon: 103.85 });
    }

    #[tokio::test(start_paused = true)]
    async fn beyond_horizon_skips_the_provider() {
        let provider = steady(1.0, 5.0);
        let query = ForecastQuery { lat: 20.0, lon: 60.0, datetime: now() + Duration::days(17) };
        let points = fetcher(provider.clone()).fetch(&[query], Some(now())).await.unwrap();

        assert_eq!(points[0].forecast_confidence, ForecastConfidence::Medium);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_call_per_rounded_coordinate() {
        let provider = steady(1.0, 5.0);
        let queries: Vec<ForecastQuery> = (0..8)
            .map(|i| ForecastQuery {
                lat: 10.001,
                lon: 20.002,
                datetime: now() + Duration::hours(i * 5),
            })
            .collect();
        let points = fetcher(provider.clone()).fetch(&queries, Some(now())).await.unwrap();

        assert_eq!(points.len(), 8);
        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.requested(), vec![(10.0, 20.0)]);
        for (q, p) in queries.iter().zip(&points) {
            assert_eq!(p.datetime, q.datetime);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_coordinate_degrades_alone() {
        let provider = Arc::new(ScriptedProvider::new(|lat, _| {
            if lat > 50.0 {
                Err(PlannerError::StructuralResponse("missing wave_height".into()))
            } else {
                Ok(hourly_series(now(), 48, |_| (0.4, 2.0, 180.0)))
            }
        }));
        let queries = [
            ForecastQuery { lat: 10.0, lon: 0.0, datetime: now() + Duration::hours(3) },
            ForecastQuery { lat: 60.0, lon: 0.0, datetime: now() + Duration::hours(3) },
            ForecastQuery { lat: 11.0, lon: 0.0, datetime: now() + Duration::hours(3) },
        ];
        let points = fetcher(provider.clone()).fetch(&queries, Some(now())).await.unwrap();

        assert_eq!(points[0].forecast_confidence, ForecastConfidence::High);
        assert_eq!(points[1].forecast_confidence, ForecastConfidence::Low);
        assert_eq!(points[2].forecast_confidence, ForecastConfidence::High);
        // Structural errors are not retried
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let provider = Arc::new(
            ScriptedProvider::new(|_, _| Ok(hourly_series(now(), 48, |_| (1.0, 5.0, 0.0)))).with_failures(2),
        );
        let query = ForecastQuery { lat: 0.0, lon: 0.0, datetime: now() + Duration::hours(1) };
        let points = fetcher(provider.clone()).fetch(&[query], Some(now())).await.unwrap();

        assert_eq!(points[0].forecast_confidence, ForecastConfidence::High);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_exhaust_retries_and_fall_back() {
        let provider = Arc::new(
            ScriptedProvider::new(|_, _| Ok(hourly_series(now(), 48, |_| (1.0, 5.0, 0.0))))
                .with_delay(std::time::Duration::from_secs(60)),
        );
        let query = ForecastQuery { lat: 0.0, lon: 0.0, datetime: now() + Duration::hours(1) };
        let points = fetcher(provider.clone()).fetch(&[query], Some(now())).await.unwrap();

        assert_eq!(points[0].forecast_confidence, ForecastConfidence::Low);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gap_in_series_is_low_confidence() {
        // Series covers only the first day
        let provider = Arc::new(ScriptedProvider::new(|_, _| Ok(hourly_series(now(), 24, |_| (1.0, 5.0, 0.0)))));
        let query = ForecastQuery { lat: 0.0, lon: 0.0, datetime: now() + Duration::days(3) };
        let points = fetcher(provider).fetch(&[query], Some(now())).await.unwrap();
        assert_eq!(points[0].forecast_confidence, ForecastConfidence::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_fetch_is_identical() {
        let provider = steady(2.2, 8.0);
        let f = fetcher(provider);
        let queries = [
            ForecastQuery { lat: 5.0, lon: 70.0, datetime: now() + Duration::hours(12) },
            ForecastQuery { lat: 8.0, lon: 65.0, datetime: now() + Duration::hours(24) },
            ForecastQuery { lat: 12.0, lon: 60.0, datetime: now() + Duration::days(20) },
        ];
        let first = f.fetch(&queries, Some(now())).await.unwrap();
        let second = f.fetch(&queries, Some(now())).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalid_coordinates_fail_before_any_call() {
        let provider = steady(1.0, 5.0);
        let queries = [ForecastQuery { lat: 95.0, lon: 0.0, datetime: now() }];
        let err = fetcher(provider.clone()).fetch(&queries, Some(now())).await.unwrap_err();
        assert!(matches!(err, PlannerError::InvalidInput(_)));
        assert!(fetcher(provider.clone()).fetch(&[], Some(now())).await.is_err());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_map_shares_one_call() {
        let in_flight = InFlight::default();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let key = CoordKey::new(1.0, 2.0);
        let fetch = || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(Arc::new(HourlySeries::default()))
        };
        let (a, b) = tokio::join!(in_flight.get_or_fetch(key, fetch), in_flight.get_or_fetch(key, fetch));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(in_flight.len(), 1);
    }

    fn distinct_coordinates(n: usize) -> Vec<ForecastQuery> {
        (0..n)
            .map(|i| ForecastQuery {
                lat: i as f64,
                lon: 50.0,
                datetime: now() + Duration::hours(2),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_calls_respect_the_concurrency_bound() {
        let provider = Arc::new(
            ScriptedProvider::new(|_, _| Ok(hourly_series(now(), 48, |_| (1.0, 5.0, 0.0))))
                .with_delay(std::time::Duration::from_secs(1)),
        );
        let config = ProviderConfig {
            max_concurrent_requests: 4,
            ..ProviderConfig::default()
        };
        let f = ForecastFetcher::new(provider.clone(), config);
        let points = f.fetch(&distinct_coordinates(20), Some(now())).await.unwrap();

        assert_eq!(points.len(), 20);
        assert_eq!(provider.calls(), 20);
        assert!(provider.peak() > 1, "peak {}", provider.peak());
        assert!(provider.peak() <= 4, "peak {}", provider.peak());
        assert_eq!(provider.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_fetch_cancels_outstanding_calls() {
        let provider = Arc::new(
            ScriptedProvider::new(|_, _| Ok(hourly_series(now(), 48, |_| (1.0, 5.0, 0.0))))
                .with_delay(std::time::Duration::from_secs(5)),
        );
        let config = ProviderConfig {
            max_concurrent_requests: 4,
            ..ProviderConfig::default()
        };
        let f = ForecastFetcher::new(provider.clone(), config);
        let queries = distinct_coordinates(20);

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(500), f.fetch(&queries, Some(now()))).await;
        assert!(outcome.is_err());

        let started = provider.calls();
        assert!(started > 0 && started <= 4, "started {started}");
        assert_eq!(provider.running(), 0);

        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert_eq!(provider.calls(), started);
    }
}
