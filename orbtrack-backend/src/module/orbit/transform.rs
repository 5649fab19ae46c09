///! ECI, Earth-fixed, geodetic and topocentric conversions
///!
///! ECI is rotated to Earth-fixed by Greenwich mean sidereal time only
///! (no polar motion or nutation). Geodetic coordinates use WGS-84.
use std::f64::consts::{PI, TAU};

use chrono::{DateTime, Utc};
use orbtrack_common::{GeodeticPoint, ObserverLocation, StateVector, TopocentricView};

use crate::error::{TrackerError, TrackerResult};

/// WGS-84 semi-major axis, km
pub const WGS84_A: f64 = 6378.137;
/// WGS-84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257223563;
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Mean Earth radius used for the visibility footprint, km
pub const MEAN_EARTH_RADIUS_KM: f64 = 6371.0;
pub const FOOTPRINT_VERTICES: usize = 80;

/// 2000-01-01T12:00:00Z, Unix milliseconds
const J2000_UNIX_MS: i64 = 946_728_000_000;

const GEODETIC_MAX_ITERATIONS: usize = 10;
const GEODETIC_TOLERANCE: f64 = 1e-10;

/// Greenwich mean sidereal time, radians in [0, 2π)
pub fn gmst(instant: DateTime<Utc>) -> f64 {
    let days = (instant.timestamp_millis() - J2000_UNIX_MS) as f64 / 86_400_000.0;
    let centuries = days / 36_525.0;

    let degrees = 280.460_618_37 + 360.985_647_366_29 * days + 0.000_387_933 * centuries * centuries
        - centuries * centuries * centuries / 38_710_000.0;
    degrees.rem_euclid(360.0).to_radians()
}

fn rotate_z(v: [f64; 3], angle: f64) -> [f64; 3] {
    let (s, c) = angle.sin_cos();
    [c * v[0] - s * v[1], s * v[0] + c * v[1], v[2]]
}

pub fn eci_to_ecef(position: [f64; 3], instant: DateTime<Utc>) -> [f64; 3] {
    rotate_z(position, -gmst(instant))
}

pub fn ecef_to_eci(position: [f64; 3], instant: DateTime<Utc>) -> [f64; 3] {
    rotate_z(position, gmst(instant))
}

fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|c| c.is_finite())
}

fn wrap_longitude(degrees: f64) -> f64 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 { 180.0 } else { wrapped }
}

/// Sub-point of an ECI state on the WGS-84 ellipsoid
pub fn to_geodetic(state: &StateVector) -> TrackerResult<GeodeticPoint> {
    if !state.is_finite() {
        return Err(TrackerError::undefined("non-finite state vector"));
    }
    let [x, y, z] = eci_to_ecef(state.position_km, state.instant);
    let r = (x * x + y * y).sqrt();
    if r == 0.0 && z == 0.0 {
        return Err(TrackerError::undefined("position at the Earth's center"));
    }

    let longitude = y.atan2(x);

    // Polar axis: the iteration below divides by cos(latitude)
    if r < 1e-9 {
        let polar_radius = WGS84_A * (1.0 - WGS84_F);
        return Ok(GeodeticPoint {
            instant: state.instant,
            latitude_deg: 90.0_f64.copysign(z),
            longitude_deg: wrap_longitude(longitude.to_degrees()),
            altitude_km: z.abs() - polar_radius,
        });
    }

    let mut latitude = z.atan2(r);
    let mut c = 1.0;
    for _ in 0..GEODETIC_MAX_ITERATIONS {
        let phi = latitude;
        c = 1.0 / (1.0 - WGS84_E2 * phi.sin() * phi.sin()).sqrt();
        latitude = (z + WGS84_A * c * WGS84_E2 * phi.sin()).atan2(r);
        if (latitude - phi).abs() < GEODETIC_TOLERANCE {
            break;
        }
    }
    let altitude = r / latitude.cos() - WGS84_A * c;

    Ok(GeodeticPoint {
        instant: state.instant,
        latitude_deg: latitude.to_degrees(),
        longitude_deg: wrap_longitude(longitude.to_degrees()),
        altitude_km: altitude,
    })
}

/// Earth-fixed position of a geodetic point, km
pub fn geodetic_to_ecef(latitude_deg: f64, longitude_deg: f64, altitude_km: f64) -> [f64; 3] {
    let lat = latitude_deg.to_radians();
    let lon = longitude_deg.to_radians();
    // Prime vertical radius of curvature
    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin() * lat.sin()).sqrt();

    [
        (n + altitude_km) * lat.cos() * lon.cos(),
        (n + altitude_km) * lat.cos() * lon.sin(),
        ((1.0 - WGS84_E2) * n + altitude_km) * lat.sin(),
    ]
}

/// Inverse of [`to_geodetic`] for the position component
pub fn geodetic_to_eci(point: &GeodeticPoint) -> [f64; 3] {
    let ecef = geodetic_to_ecef(point.latitude_deg, point.longitude_deg, point.altitude_km);
    ecef_to_eci(ecef, point.instant)
}

/// Look angles from `observer` to the object, resolved in the local south/east/zenith frame
pub fn to_topocentric(state: &StateVector, observer: &ObserverLocation) -> TrackerResult<TopocentricView> {
    let observer_coords = [observer.latitude_deg, observer.longitude_deg, observer.altitude_m];
    if !state.is_finite() || !all_finite(&observer_coords) {
        return Err(TrackerError::undefined(format!(
            "non-finite input for observer '{}'",
            observer.name
        )));
    }

    let object = eci_to_ecef(state.position_km, state.instant);
    let station = geodetic_to_ecef(
        observer.latitude_deg,
        observer.longitude_deg,
        observer.altitude_m / 1000.0,
    );
    let d = [object[0] - station[0], object[1] - station[1], object[2] - station[2]];
    let range = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    if range < 1e-9 {
        return Err(TrackerError::undefined(format!(
            "object coincides with observer '{}'",
            observer.name
        )));
    }

    let (sin_lat, cos_lat) = observer.latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = observer.longitude_deg.to_radians().sin_cos();

    let south = sin_lat * cos_lon * d[0] + sin_lat * sin_lon * d[1] - cos_lat * d[2];
    let east = -sin_lon * d[0] + cos_lon * d[1];
    let zenith = cos_lat * cos_lon * d[0] + cos_lat * sin_lon * d[1] + sin_lat * d[2];

    let elevation = (zenith / range).clamp(-1.0, 1.0).asin().to_degrees();
    if !(-90.0..=90.0).contains(&elevation) {
        return Err(TrackerError::undefined(format!(
            "elevation {} out of range for observer '{}'",
            elevation, observer.name
        )));
    }
    let azimuth = east.atan2(-south).rem_euclid(TAU).to_degrees();

    Ok(TopocentricView {
        elevation_deg: elevation,
        azimuth_deg: azimuth,
        range_km: range,
    })
}

/// Visible-horizon half angle (radians) for an object at `altitude_km`
fn horizon_half_angle(altitude_km: f64) -> Option<f64> {
    if !altitude_km.is_finite() || altitude_km <= 0.0 {
        return None;
    }
    Some((MEAN_EARTH_RADIUS_KM / (MEAN_EARTH_RADIUS_KM + altitude_km)).acos())
}

/// Ground arc from the sub-point to the visible horizon, km
pub fn footprint_radius_km(altitude_km: f64) -> Option<f64> {
    horizon_half_angle(altitude_km).map(|angle| MEAN_EARTH_RADIUS_KM * angle)
}

/// Visibility footprint as a closed ring of `[lon, lat]` vertices around the sub-point
pub fn footprint_polygon(point: &GeodeticPoint) -> Vec<[f64; 2]> {
    let Some(angle) = horizon_half_angle(point.altitude_km) else {
        return Vec::new();
    };
    let (sin_d, cos_d) = angle.sin_cos();
    let lat1 = point.latitude_deg.to_radians();
    let lon1 = point.longitude_deg.to_radians();

    (0..FOOTPRINT_VERTICES)
        .map(|i| {
            let bearing = 2.0 * PI * i as f64 / (FOOTPRINT_VERTICES - 1) as f64;
            let lat2 = (lat1.sin() * cos_d + lat1.cos() * sin_d * bearing.cos()).asin();
            let lon2 = lon1
                + (bearing.sin() * sin_d * lat1.cos()).atan2(cos_d - lat1.sin() * lat2.sin());
            [wrap_longitude(lon2.to_degrees()), lat2.to_degrees()]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::elements::parser::parse_element_set;
    use crate::module::elements::parser::tests::{ISS_2008_L1, ISS_2008_L2};
    use crate::module::orbit::OrbitalPropagator;
    use chrono::TimeZone;

    fn state_from_point(point: &GeodeticPoint) -> StateVector {
        StateVector {
            instant: point.instant,
            position_km: geodetic_to_eci(point),
            velocity_km_s: [0.0, 7.67, 0.0],
            epoch_offset_minutes: 0.0,
        }
    }

    #[test]
    fn test_gmst_at_j2000() {
        let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((gmst(j2000).to_degrees() - 280.46061837).abs() < 1e-9);
    }

    #[test]
    fn test_geodetic_round_trip() {
        let point = GeodeticPoint {
            instant: Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap(),
            latitude_deg: 51.6,
            longitude_deg: -120.25,
            altitude_km: 420.0,
        };
        let back = to_geodetic(&state_from_point(&point)).unwrap();
        assert!((back.altitude_km - point.altitude_km).abs() < 1.0);
        assert!((back.latitude_deg - point.latitude_deg).abs() < 1e-6);
        assert!((back.longitude_deg - point.longitude_deg).abs() < 1e-6);
    }

    #[test]
    fn test_propagated_leo_round_trip() {
        let set = parse_element_set(None, ISS_2008_L1, ISS_2008_L2, "test").unwrap();
        let propagator = OrbitalPropagator::new(&set).unwrap();
        let state = propagator.state_at(set.epoch + chrono::Duration::minutes(45)).unwrap();

        let point = to_geodetic(&state).unwrap();
        assert!(point.altitude_km > 300.0 && point.altitude_km < 450.0);
        assert!(point.latitude_deg.abs() <= 52.5);

        let eci = geodetic_to_eci(&point);
        let dx: f64 = (0..3).map(|i| (eci[i] - state.position_km[i]).powi(2)).sum::<f64>().sqrt();
        assert!(dx < 1.0);
    }

    #[test]
    fn test_overhead_observer() {
        let point = GeodeticPoint {
            instant: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_km: 400.0,
        };
        let observer = ObserverLocation::new("Null Island", 0.0, 0.0, 0.0);

        let view = to_topocentric(&state_from_point(&point), &observer).unwrap();
        assert!((view.elevation_deg - 90.0).abs() < 1e-6);
        assert!((view.range_km - 400.0).abs() < 1e-6);
    }

    #[test]
    fn test_azimuth_points_north() {
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let point = GeodeticPoint {
            instant,
            latitude_deg: 5.0,
            longitude_deg: 0.0,
            altitude_km: 400.0,
        };
        let observer = ObserverLocation::new("Null Island", 0.0, 0.0, 0.0);

        let view = to_topocentric(&state_from_point(&point), &observer).unwrap();
        assert!(view.azimuth_deg < 1e-6 || view.azimuth_deg > 360.0 - 1e-6);
        assert!(view.elevation_deg > 0.0 && view.elevation_deg < 90.0);
    }

    #[test]
    fn test_degenerate_geometry_is_undefined() {
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let observer = ObserverLocation::new("Pad", 28.5, -80.6, 0.0);
        let on_pad = state_from_point(&GeodeticPoint {
            instant,
            latitude_deg: 28.5,
            longitude_deg: -80.6,
            altitude_km: 0.0,
        });
        assert!(matches!(
            to_topocentric(&on_pad, &observer),
            Err(TrackerError::TransformUndefined(_))
        ));

        let mut broken = on_pad;
        broken.position_km[0] = f64::NAN;
        assert!(matches!(to_geodetic(&broken), Err(TrackerError::TransformUndefined(_))));

        let nowhere = ObserverLocation::new("Nowhere", f64::NAN, 0.0, 0.0);
        assert!(matches!(
            to_topocentric(&on_pad, &nowhere),
            Err(TrackerError::TransformUndefined(_))
        ));
    }

    #[test]
    fn test_footprint() {
        let radius = footprint_radius_km(400.0).unwrap();
        assert!((radius - 2200.8).abs() < 0.1);
        assert!(footprint_radius_km(0.0).is_none());

        let point = GeodeticPoint {
            instant: Utc::now(),
            latitude_deg: 10.0,
            longitude_deg: 20.0,
            altitude_km: 400.0,
        };
        let polygon = footprint_polygon(&point);
        assert_eq!(polygon.len(), FOOTPRINT_VERTICES);
        assert!((polygon[0][0] - polygon[FOOTPRINT_VERTICES - 1][0]).abs() < 1e-9);
        assert!((polygon[0][1] - polygon[FOOTPRINT_VERTICES - 1][1]).abs() < 1e-9);
        // First vertex lies due north at the half angle
        let half_angle = (radius / MEAN_EARTH_RADIUS_KM).to_degrees();
        assert!((polygon[0][1] - (10.0 + half_angle)).abs() < 1e-9);
    }
}
