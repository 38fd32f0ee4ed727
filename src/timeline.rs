//! # Position Timeline Generator
//!
//! Turns a route polyline, a service speed and a departure instant into the
//! time-ordered positions the forecast stage asks about.
//!
//! ## Interpolation
//! Each leg is walked in steps of the sampling interval. Positions inside a
//! leg are a straight parametric blend of the leg's endpoints by the fraction
//! of leg time elapsed:
//! ```text
//! lat = lat0 + (lat1 - lat0) * t / leg_hours
//! ```
//! The leg's terminal waypoint is always emitted exactly, even when it falls
//! short of a full sampling step. Distance and time accumulate across legs.
//!
//! Pure and synchronous: no I/O, no suspension.

use crate::validation::{check_coordinates, check_in_range, check_non_empty, check_positive, parse_utc};
use crate::{PlannerError, TimelinePosition, Waypoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in nautical miles
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Slowest accepted service speed, knots
pub const MIN_SPEED_KT: f64 = 5.0;
/// Fastest accepted service speed, knots
pub const MAX_SPEED_KT: f64 = 30.0;

/// Largest timeline a single request may produce
pub const MAX_TIMELINE_POSITIONS: usize = 100_000;

/// Timeline request as received from the orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineRequest {
    pub waypoints: Vec<Waypoint>,
    pub speed_kt: f64,
    /// ISO-8601 departure instant
    pub departure_datetime: String,
    /// Falls back to the configured interval when absent
    #[serde(default)]
    pub sampling_interval_hours: Option<f64>,
}

/// Great-circle distance between two points in nautical miles (haversine).
pub fn haversine_nm(a: Waypoint, b: Waypoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_NM * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` towards `b`, degrees in `[0, 360)`.
pub fn initial_bearing(a: Waypoint, b: Waypoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dlambda = (b.lon - a.lon).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    let deg = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

/// Convert fractional hours to a chrono duration at millisecond precision.
pub(crate) fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

/// Validate a request and generate its timeline.
///
/// `default_interval_hours` is used when the request carries no interval.
pub fn generate(
    request: &TimelineRequest,
    default_interval_hours: f64,
) -> Result<Vec<TimelinePosition>, PlannerError> {
    let departure = parse_utc("departure_datetime", &request.departure_datetime)?;
    let interval = request
        .sampling_interval_hours
        .unwrap_or(default_interval_hours);
    generate_from(&request.waypoints, request.speed_kt, departure, interval)
}

/// Generate a timeline from already-parsed inputs.
pub fn generate_from(
    waypoints: &[Waypoint],
    speed_kt: f64,
    departure: DateTime<Utc>,
    sampling_interval_hours: f64,
) -> Result<Vec<TimelinePosition>, PlannerError> {
    check_non_empty("waypoints", waypoints)?;
    for (idx, wp) in waypoints.iter().enumerate() {
        check_coordinates(&format!("waypoints[{idx}]"), wp.lat, wp.lon)?;
    }
    check_in_range("speed_kt", speed_kt, MIN_SPEED_KT, MAX_SPEED_KT)?;
    check_positive("sampling_interval_hours", sampling_interval_hours)?;

    let legs: Vec<(f64, f64)> = waypoints
        .windows(2)
        .map(|leg| {
            let nm = haversine_nm(leg[0], leg[1]);
            (nm, nm / speed_kt)
        })
        .collect();
    let estimated: f64 = legs
        .iter()
        .map(|&(_, leg_hours)| (leg_hours / sampling_interval_hours).ceil() + 1.0)
        .sum::<f64>()
        + 1.0;
    if estimated > MAX_TIMELINE_POSITIONS as f64 {
        return Err(PlannerError::invalid(format!(
            "sampling_interval_hours {sampling_interval_hours} would produce about {estimated:.0} positions, more than {MAX_TIMELINE_POSITIONS}"
        )));
    }

    let first = waypoints[0];
    let mut timeline = vec![TimelinePosition {
        lat: first.lat,
        lon: first.lon,
        datetime: departure,
        distance_from_start_nm: 0.0,
        segment_index: 0,
    }];

    let mut leg_start_time = departure;
    let mut leg_start_distance = 0.0;

    for (segment_index, (leg, &(leg_nm, leg_hours))) in waypoints.windows(2).zip(&legs).enumerate() {
        let (from, to) = (leg[0], leg[1]);
        let leg_duration = hours(leg_hours);

        let mut elapsed = sampling_interval_hours;
        while hours(elapsed) < leg_duration {
            let fraction = elapsed / leg_hours;
            push_advancing(
                &mut timeline,
                TimelinePosition {
                    lat: from.lat + (to.lat - from.lat) * fraction,
                    lon: from.lon + (to.lon - from.lon) * fraction,
                    datetime: leg_start_time + hours(elapsed),
                    distance_from_start_nm: leg_start_distance + leg_nm * fraction,
                    segment_index,
                },
            );
            elapsed += sampling_interval_hours;
        }

        leg_start_time += leg_duration;
        leg_start_distance += leg_nm;

        push_advancing(
            &mut timeline,
            TimelinePosition {
                lat: to.lat,
                lon: to.lon,
                datetime: leg_start_time,
                distance_from_start_nm: leg_start_distance,
                segment_index,
            },
        );
    }

    Ok(timeline)
}

/// Append only if the instant moves forward.
///
/// Accepted instants strictly increase, so comparing against the last
/// position also rules out any repeated `(lat, lon, datetime)`.
fn push_advancing(timeline: &mut Vec<TimelinePosition>, pos: TimelinePosition) {
    let stalled = timeline
        .last()
        .is_some_and(|last| last.datetime >= pos.datetime);
    if !stalled {
        timeline.push(pos);
    }
}

/// Bearing of the leg each timeline position lies on.
///
/// Used to give every forecast point its own heading when the consumption
/// stage runs over a whole voyage.
pub fn leg_headings(waypoints: &[Waypoint], timeline: &[TimelinePosition]) -> Vec<f64> {
    timeline
        .iter()
        .map(|pos| match (waypoints.get(pos.segment_index), waypoints.get(pos.segment_index + 1)) {
            (Some(&from), Some(&to)) => initial_bearing(from, to),
            _ => 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn departure() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 25, 8, 0, 0).unwrap()
    }

    #[test]
    fn single_waypoint_yields_one_position() {
        let wp = Waypoint { lat: 1.29, lon: 103.85 };
        let timeline = generate_from(&[wp], 14.0, departure(), 12.0).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].distance_from_start_nm, 0.0);
        assert_eq!(timeline[0].datetime, departure());
        assert_eq!(timeline[0].segment_index, 0);
    }

    #[test]
    fn one_degree_of_latitude_is_sixty_nm() {
        let d = haversine_nm(Waypoint { lat: 0.0, lon: 0.0 }, Waypoint { lat: 1.0, lon: 0.0 });
        assert!((d - 60.04).abs() < 0.05, "got {d}");
    }

    #[test]
    fn terminal_waypoint_emitted_exactly() {
        // 60.04 nm at 10 kt: 6.004 h, sampled every 2 h -> t = 0, 2, 4, 6, 6.004
        let route = [Waypoint { lat: 0.0, lon: 0.0 }, Waypoint { lat: 1.0, lon: 0.0 }];
        let timeline = generate_from(&route, 10.0, departure(), 2.0).unwrap();
        assert_eq!(timeline.len(), 5);

        let last = timeline.last().unwrap();
        assert_eq!(last.lat, 1.0);
        assert_eq!(last.lon, 0.0);
        let leg_nm = haversine_nm(route[0], route[1]);
        assert!((last.distance_from_start_nm - leg_nm).abs() < 1e-9);
    }

    #[test]
    fn interpolation_is_parametric_by_time() {
        let route = [Waypoint { lat: 0.0, lon: 0.0 }, Waypoint { lat: 0.0, lon: 2.0 }];
        let leg_hours = haversine_nm(route[0], route[1]) / 12.0;
        let timeline = generate_from(&route, 12.0, departure(), leg_hours / 2.0 + 0.01).unwrap();
        let mid = &timeline[1];
        let expected_lon = 2.0 * (leg_hours / 2.0 + 0.01) / leg_hours;
        assert!((mid.lon - expected_lon).abs() < 1e-9);
        assert_eq!(mid.lat, 0.0);
    }

    #[test]
    fn segment_index_tracks_legs() {
        let route = [
            Waypoint { lat: 0.0, lon: 0.0 },
            Waypoint { lat: 0.0, lon: 1.0 },
            Waypoint { lat: 1.0, lon: 1.0 },
        ];
        let timeline = generate_from(&route, 10.0, departure(), 4.0).unwrap();
        assert_eq!(timeline.first().unwrap().segment_index, 0);
        assert_eq!(timeline.last().unwrap().segment_index, 1);
        assert!(timeline.windows(2).all(|w| w[0].segment_index <= w[1].segment_index));
    }

    #[test]
    fn repeated_waypoint_does_not_duplicate_positions() {
        let route = [
            Waypoint { lat: 0.0, lon: 0.0 },
            Waypoint { lat: 0.0, lon: 1.0 },
            Waypoint { lat: 0.0, lon: 1.0 },
        ];
        let timeline = generate_from(&route, 10.0, departure(), 24.0).unwrap();
        assert_eq!(timeline.len(), 2);
        assert!(timeline.windows(2).all(|w| w[0].datetime < w[1].datetime));
    }

    #[test]
    fn rejects_out_of_range_inputs() {
        let wp = Waypoint { lat: 0.0, lon: 0.0 };
        assert!(generate_from(&[], 14.0, departure(), 12.0).is_err());
        assert!(generate_from(&[wp], 4.9, departure(), 12.0).is_err());
        assert!(generate_from(&[wp], 30.1, departure(), 12.0).is_err());
        assert!(generate_from(&[wp], 14.0, departure(), 0.0).is_err());
        assert!(generate_from(&[Waypoint { lat: 91.0, lon: 0.0 }], 14.0, departure(), 12.0).is_err());
    }

    #[test]
    fn malformed_departure_is_invalid_input() {
        let request = TimelineRequest {
            waypoints: vec![Waypoint { lat: 0.0, lon: 0.0 }],
            speed_kt: 14.0,
            departure_datetime: "25/12/2024 08:00".to_string(),
            sampling_interval_hours: None,
        };
        assert!(matches!(generate(&request, 12.0), Err(PlannerError::InvalidInput(_))));
    }

    #[test]
    fn bearing_points_along_the_leg() {
        let origin = Waypoint { lat: 0.0, lon: 0.0 };
        assert!((initial_bearing(origin, Waypoint { lat: 1.0, lon: 0.0 }) - 0.0).abs() < 1e-9);
        assert!((initial_bearing(origin, Waypoint { lat: 0.0, lon: 1.0 }) - 90.0).abs() < 1e-9);
        assert!((initial_bearing(origin, Waypoint { lat: -1.0, lon: 0.0 }) - 180.0).abs() < 1e-9);
        assert!((initial_bearing(origin, Waypoint { lat: 0.0, lon: -1.0 }) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn dense_sampling_stays_linear() {
        // Roughly 11,600 positions; the old whole-timeline scan made this quadratic
        let route = [Waypoint { lat: 1.29, lon: 103.85 }, Waypoint { lat: 22.54, lon: 59.08 }];
        let timeline = generate_from(&route, 5.0, departure(), 0.05).unwrap();
        assert!(timeline.len() > 11_000);
        assert!(timeline.windows(2).all(|w| w[0].datetime < w[1].datetime));
        assert_eq!(timeline.last().unwrap().lat, 22.54);
    }

    #[test]
    fn oversized_timeline_is_rejected() {
        let route = [Waypoint { lat: 1.29, lon: 103.85 }, Waypoint { lat: 22.54, lon: 59.08 }];
        let err = generate_from(&route, 5.0, departure(), 0.001).unwrap_err();
        assert!(matches!(err, PlannerError::InvalidInput(ref m) if m.contains("sampling_interval_hours")));
    }
}
