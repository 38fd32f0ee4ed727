//! In-memory forecast provider for tests.

use crate::provider::{ForecastProvider, HourlySample, HourlySeries};
use crate::PlannerError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

type Builder = dyn Fn(f64, f64) -> Result<HourlySeries, PlannerError> + Send + Sync;

/// Provider whose answer is computed from the requested coordinate.
///
/// Counts calls, records requested coordinates, tracks how many calls are
/// running at once, can fail the first `n` calls with a transient error and
/// can stall each call.
pub(crate) struct ScriptedProvider {
    build: Box<Builder>,
    failures_left: AtomicU32,
    delay: std::time::Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    requested: Mutex<Vec<(f64, f64)>>,
}

/// Decrements the running count when a call finishes or is dropped.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    pub(crate) fn new<F>(build: F) -> Self
    where
        F: Fn(f64, f64) -> Result<HourlySeries, PlannerError> + Send + Sync + 'static,
    {
        ScriptedProvider {
            build: Box::new(build),
            failures_left: AtomicU32::new(0),
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `n` calls with `UpstreamUnavailable`.
    pub(crate) fn with_failures(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently between start and finish.
    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Most calls ever running at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn requested(&self) -> Vec<(f64, f64)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForecastProvider for ScriptedProvider {
    async fn hourly_forecast(&self, lat: f64, lon: f64, _days: u32) -> Result<HourlySeries, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push((lat, lon));
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PlannerError::UpstreamUnavailable("HTTP 503".into()));
        }
        (self.build)(lat, lon)
    }
}

/// `hours` hourly samples from `start`; `values(i)` gives
/// `(wave_height_m, wind_speed_ms, wind_direction_deg)` for hour `i`.
pub(crate) fn hourly_series<F>(start: DateTime<Utc>, hours: usize, values: F) -> HourlySeries
where
    F: Fn(usize) -> (f64, f64, f64),
{
    HourlySeries::new(
        (0..hours)
            .map(|i| {
                let (wave, wind, direction) = values(i);
                HourlySample {
                    time: start + Duration::hours(i as i64),
                    wave_height_m: wave,
                    wind_speed_ms: wind,
                    wind_direction_deg: direction,
                }
            })
            .collect(),
    )
}
