//! # Voyage Planner
//!
//! Entry points for the orchestration layer. A [`VoyagePlanner`] owns one
//! injected forecast provider and the loaded [`Config`]; every operation
//! validates its input before touching the network.
//!
//! ## Operations
//! - [`VoyagePlanner::generate_timeline`]: positions along the route
//! - [`VoyagePlanner::fetch_forecasts`]: conditions per position
//! - [`VoyagePlanner::calculate_consumption`]: weather-adjusted fuel estimate
//! - [`VoyagePlanner::evaluate_ports`]: bunkering window safety
//! - [`VoyagePlanner::plan_voyage`]: the first three chained, plus an
//!   optional check of the destination port at the computed arrival time

use crate::config::Config;
use crate::consumption::{self, ConsumptionRequest, ConsumptionResult};
use crate::forecast::{ForecastFetcher, ForecastQuery};
use crate::port_safety::{self, PortCall, PortSafetyRequest, PortSafetyResult};
use crate::provider::{ForecastProvider, OpenMeteoProvider};
use crate::timeline::{self, TimelineRequest};
use crate::validation::{check_coordinates, check_fuel_quantities, check_positive};
use crate::{ForecastPoint, PlannerError, TimelinePosition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Destination port to check once the arrival time is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationPort {
    pub port_code: String,
    pub port_name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub bunkering_duration_hours: Option<u32>,
}

/// Whole-voyage request: route, speed, departure and baseline burn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoyageRequest {
    #[serde(flatten)]
    pub route: TimelineRequest,
    pub base_consumption_mt: f64,
    #[serde(default)]
    pub fuel_type_breakdown: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub destination: Option<DestinationPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoyagePlan {
    pub timeline: Vec<TimelinePosition>,
    pub forecasts: Vec<ForecastPoint>,
    pub consumption: ConsumptionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PortSafetyResult>,
}

pub struct VoyagePlanner {
    fetcher: ForecastFetcher,
    config: Config,
}

impl VoyagePlanner {
    pub fn new(provider: Arc<dyn ForecastProvider>, config: Config) -> Self {
        VoyagePlanner {
            fetcher: ForecastFetcher::new(provider, config.provider.clone()),
            config,
        }
    }

    /// Build a planner talking to the configured Open-Meteo endpoint.
    pub fn with_open_meteo(config: Config) -> Result<Self, PlannerError> {
        let provider = OpenMeteoProvider::new(config.provider.clone())?;
        Ok(Self::new(Arc::new(provider), config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn generate_timeline(&self, request: &TimelineRequest) -> Result<Vec<TimelinePosition>, PlannerError> {
        timeline::generate(request, self.config.timeline.sampling_interval_hours)
    }

    /// Forecast each query. `now` anchors the 16-day horizon; `None` means
    /// the current time.
    pub async fn fetch_forecasts(
        &self,
        queries: &[ForecastQuery],
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<ForecastPoint>, PlannerError> {
        self.fetcher.fetch(queries, now).await
    }

    pub fn calculate_consumption(&self, request: &ConsumptionRequest) -> Result<ConsumptionResult, PlannerError> {
        consumption::calculate(request, &self.config.consumption)
    }

    pub async fn evaluate_ports(&self, requests: &[PortSafetyRequest]) -> Result<Vec<PortSafetyResult>, PlannerError> {
        port_safety::evaluate(&self.fetcher, &self.config.bunkering, requests).await
    }

    /// Timeline, forecast and consumption for a whole voyage, each point
    /// costed against the bearing of the leg it lies on.
    pub async fn plan_voyage(
        &self,
        request: &VoyageRequest,
        now: Option<DateTime<Utc>>,
    ) -> Result<VoyagePlan, PlannerError> {
        // Validate everything the later stages need before any fetch
        check_positive("base_consumption_mt", request.base_consumption_mt)?;
        if let Some(fuels) = &request.fuel_type_breakdown {
            check_fuel_quantities("fuel_type_breakdown", fuels)?;
        }
        let destination_hours = match &request.destination {
            Some(dest) => {
                check_coordinates("destination", dest.lat, dest.lon)?;
                Some(port_safety::bunkering_duration(
                    "destination",
                    dest.bunkering_duration_hours,
                    &self.config.bunkering,
                )?)
            }
            None => None,
        };

        let timeline = self.generate_timeline(&request.route)?;
        let arrival = timeline
            .last()
            .map(|pos| pos.datetime)
            .ok_or_else(|| PlannerError::invalid("route produced an empty timeline"))?;

        let queries: Vec<ForecastQuery> = timeline.iter().map(ForecastQuery::from).collect();
        let forecasts = self.fetch_forecasts(&queries, now).await?;

        let headings = timeline::leg_headings(&request.route.waypoints, &timeline);
        let consumption = consumption::calculate_with_headings(
            &forecasts,
            request.base_consumption_mt,
            &headings,
            request.fuel_type_breakdown.as_ref(),
            &self.config.consumption,
        )?;

        let destination = match (&request.destination, destination_hours) {
            (Some(dest), Some(duration_hours)) => {
                let call = PortCall {
                    code: dest.port_code.clone(),
                    name: dest.port_name.clone(),
                    lat: dest.lat,
                    lon: dest.lon,
                    arrival,
                    duration_hours,
                };
                port_safety::evaluate_calls(&self.fetcher, &self.config.bunkering, vec![call])
                    .await
                    .pop()
            }
            _ => None,
        };

        tracing::info!(
            positions = timeline.len(),
            adjusted_mt = consumption.weather_adjusted_consumption_mt,
            alerts = consumption.weather_alerts.len(),
            "voyage planned"
        );

        Ok(VoyagePlan {
            timeline,
            forecasts,
            consumption,
            destination,
        })
    }
}
