//! # Weather-Adjusted Consumption
//!
//! Converts a forecast series plus a still-water consumption figure into a
//! weather-adjusted estimate.
//!
//! ## Multiplier model
//! Each forecast point gets a multiplier:
//! ```text
//! multiplier = min(wave_factor(sea_state) * wind_factor, max_multiplier)
//! ```
//! - `wave_factor` rises monotonically with sea state, 1.0 for Calm up to
//!   1.9 for High
//! - `wind_factor` depends on the wind's angle off the bow. A headwind
//!   (relative angle 0°) adds up to `headwind_coefficient`; a following wind
//!   (180°) removes up to `following_wind_coefficient`, so a strong
//!   following wind over calm seas yields about 0.95
//! - both wind terms scale with `wind_speed / wind_reference_kt`, capped at 1
//!
//! The voyage estimate is `base * mean(multiplier)`. All constants live in
//! [`ConsumptionModel`] so they can be calibrated from configuration.
//!
//! Pure computation: no I/O.

use crate::config::ConsumptionModel;
use crate::validation::{check_fuel_quantities, check_heading, check_non_empty, check_positive};
use crate::{Coordinates, ForecastConfidence, ForecastPoint, PlannerError, SeaState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionRequest {
    pub forecast_points: Vec<ForecastPoint>,
    /// Still-water consumption for the voyage, metric tonnes
    pub base_consumption_mt: f64,
    pub vessel_heading_deg: f64,
    /// Optional per-fuel quantities (e.g. `VLSFO`, `MGO`), metric tonnes
    #[serde(default)]
    pub fuel_type_breakdown: Option<BTreeMap<String, f64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Severe,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub severity: AlertSeverity,
    pub description: String,
    pub datetime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Coordinates>,
}

/// How many points came from each confidence tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoyageWeatherSummary {
    pub avg_wave_height_m: f64,
    pub max_wave_height_m: f64,
    pub avg_multiplier: f64,
    /// Instant of the point with the highest multiplier
    pub worst_conditions_date: DateTime<Utc>,
    pub confidence_counts: ConfidenceCounts,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuelBreakdown {
    pub base_mt: f64,
    pub adjusted_mt: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionResult {
    pub base_consumption_mt: f64,
    pub weather_adjusted_consumption_mt: f64,
    pub additional_fuel_needed_mt: f64,
    pub consumption_increase_percent: f64,
    pub voyage_weather_summary: VoyageWeatherSummary,
    pub weather_alerts: Vec<WeatherAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown_by_fuel_type: Option<BTreeMap<String, FuelBreakdown>>,
}

impl ConsumptionModel {
    pub fn wave_factor(&self, state: SeaState) -> f64 {
        let idx = match state {
            SeaState::Calm => 0,
            SeaState::Slight => 1,
            SeaState::Moderate => 2,
            SeaState::Rough => 3,
            SeaState::VeryRough => 4,
            SeaState::High => 5,
        };
        self.wave_factors[idx]
    }

    /// Wind term for a wind blowing from `wind_direction_deg` on a vessel
    /// steering `heading_deg`.
    pub fn wind_factor(&self, wind_speed_kt: f64, wind_direction_deg: f64, heading_deg: f64) -> f64 {
        let relative = relative_wind_angle(wind_direction_deg, heading_deg);
        let along = relative.to_radians().cos();
        let strength = if self.wind_reference_kt > 0.0 {
            (wind_speed_kt / self.wind_reference_kt).clamp(0.0, 1.0)
        } else {
            0.0
        };
        if along >= 0.0 {
            1.0 + self.headwind_coefficient * strength * along
        } else {
            1.0 + self.following_wind_coefficient * strength * along
        }
    }

    /// Multiplier for one point. The sea state is always re-derived from
    /// the wave height, whatever the point carries.
    pub fn multiplier(&self, point: &ForecastPoint, heading_deg: f64) -> f64 {
        let raw = self.wave_factor(SeaState::from_wave_height(point.wave_height_m))
            * self.wind_factor(point.wind_speed_kt, point.wind_direction_deg, heading_deg);
        raw.min(self.max_multiplier)
    }
}

/// Angle between where the wind comes from and where the bow points,
/// folded into `[0, 180]`. 0° is dead ahead.
pub fn relative_wind_angle(wind_direction_deg: f64, heading_deg: f64) -> f64 {
    let diff = (wind_direction_deg - heading_deg).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Validate a request and compute its result with one heading throughout.
pub fn calculate(request: &ConsumptionRequest, model: &ConsumptionModel) -> Result<ConsumptionResult, PlannerError> {
    check_heading("vessel_heading_deg", request.vessel_heading_deg)?;
    let headings = vec![request.vessel_heading_deg; request.forecast_points.len()];
    calculate_with_headings(
        &request.forecast_points,
        request.base_consumption_mt,
        &headings,
        request.fuel_type_breakdown.as_ref(),
        model,
    )
}

/// Compute a result where each forecast point carries its own heading.
pub fn calculate_with_headings(
    points: &[ForecastPoint],
    base_consumption_mt: f64,
    headings: &[f64],
    fuel_type_breakdown: Option<&BTreeMap<String, f64>>,
    model: &ConsumptionModel,
) -> Result<ConsumptionResult, PlannerError> {
    check_non_empty("forecast_points", points)?;
    check_positive("base_consumption_mt", base_consumption_mt)?;
    if headings.len() != points.len() {
        return Err(PlannerError::invalid(format!(
            "{} headings given for {} forecast points",
            headings.len(),
            points.len()
        )));
    }
    for (idx, heading) in headings.iter().enumerate() {
        check_heading(&format!("headings[{idx}]"), *heading)?;
    }
    for (idx, p) in points.iter().enumerate() {
        if !p.wave_height_m.is_finite() || p.wave_height_m < 0.0 || !p.wind_speed_kt.is_finite() || p.wind_speed_kt < 0.0 {
            return Err(PlannerError::invalid(format!(
                "forecast_points[{idx}] has negative or non-finite conditions"
            )));
        }
    }
    if let Some(fuels) = fuel_type_breakdown {
        check_fuel_quantities("fuel_type_breakdown", fuels)?;
    }

    let multipliers: Vec<f64> = points
        .iter()
        .zip(headings)
        .map(|(p, &h)| model.multiplier(p, h))
        .collect();
    let n = points.len() as f64;
    let avg_multiplier = multipliers.iter().sum::<f64>() / n;

    let adjusted = base_consumption_mt * avg_multiplier;
    let additional = adjusted - base_consumption_mt;

    let mut worst_idx = 0;
    for (idx, m) in multipliers.iter().enumerate() {
        if *m > multipliers[worst_idx] {
            worst_idx = idx;
        }
    }

    let mut confidence_counts = ConfidenceCounts::default();
    for p in points {
        match p.forecast_confidence {
            ForecastConfidence::High => confidence_counts.high += 1,
            ForecastConfidence::Medium => confidence_counts.medium += 1,
            ForecastConfidence::Low => confidence_counts.low += 1,
        }
    }

    let summary = VoyageWeatherSummary {
        avg_wave_height_m: points.iter().map(|p| p.wave_height_m).sum::<f64>() / n,
        max_wave_height_m: points.iter().map(|p| p.wave_height_m).fold(0.0, f64::max),
        avg_multiplier,
        worst_conditions_date: points[worst_idx].datetime,
        confidence_counts,
    };

    let breakdown_by_fuel_type = fuel_type_breakdown.map(|fuels| {
        fuels
            .iter()
            .map(|(fuel, &qty)| {
                (
                    fuel.clone(),
                    FuelBreakdown {
                        base_mt: qty,
                        adjusted_mt: qty * avg_multiplier,
                    },
                )
            })
            .collect()
    });

    Ok(ConsumptionResult {
        base_consumption_mt,
        weather_adjusted_consumption_mt: adjusted,
        additional_fuel_needed_mt: additional,
        consumption_increase_percent: 100.0 * additional / base_consumption_mt,
        voyage_weather_summary: summary,
        weather_alerts: points.iter().filter_map(|p| alert_for(p, model)).collect(),
        breakdown_by_fuel_type,
    })
}

fn alert_for(point: &ForecastPoint, model: &ConsumptionModel) -> Option<WeatherAlert> {
    let sea_state = SeaState::from_wave_height(point.wave_height_m);
    let severity = if sea_state >= SeaState::High || point.wind_speed_kt >= model.severe_wind_kt {
        AlertSeverity::Severe
    } else if sea_state >= SeaState::Rough || point.wind_speed_kt >= model.warning_wind_kt {
        AlertSeverity::Warning
    } else {
        return None;
    };

    let prefix = match severity {
        AlertSeverity::Severe => "Severe weather",
        AlertSeverity::Warning => "Heavy weather",
    };
    Some(WeatherAlert {
        severity,
        description: format!(
            "{prefix}: {} seas ({:.1} m waves, {:.0} kt wind) near {:.2}, {:.2}",
            sea_state.label(),
            point.wave_height_m,
            point.wind_speed_kt,
            point.position.lat,
            point.position.lon
        ),
        datetime: point.datetime,
        position: Some(point.position),
    })
}
