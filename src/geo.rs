//! Great-circle distance helpers used by proximity filtering

use serde_json::Value;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates, in kilometers.
///
/// Returns `None` when any coordinate is not a finite number. An undefined
/// distance never falls within a radius.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    if ![lat1, lon1, lat2, lon2].iter().all(|v| v.is_finite()) {
        return None;
    }

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Some(EARTH_RADIUS_KM * c)
}

/// Whether a (possibly undefined) distance lies within `radius_km`
pub fn within_radius(distance: Option<f64>, radius_km: f64) -> bool {
    matches!(distance, Some(d) if d <= radius_km)
}

/// Resolve a loosely-typed coordinate into a finite number.
///
/// Accepts JSON numbers and numeric strings.
pub fn coordinate(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A point plus radius used to restrict peer listings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proximity {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl Proximity {
    pub fn new(lat: f64, lon: f64, radius_km: f64) -> Self {
        Self {
            lat,
            lon,
            radius_km,
        }
    }

    pub fn distance_to(&self, point: Option<(f64, f64)>) -> Option<f64> {
        let (lat, lon) = point?;
        distance_km(self.lat, self.lon, lat, lon)
    }

    pub fn contains(&self, point: Option<(f64, f64)>) -> bool {
        within_radius(self.distance_to(point), self.radius_km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_distance() {
        let d = distance_km(48.2082, 16.3738, 48.2082, 16.3738).unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_vienna_to_berlin() {
        // ~524 km
        let d = distance_km(48.2082, 16.3738, 52.52, 13.405).unwrap();
        assert!((d - 524.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_km(0.0, 0.0, 0.0, 180.0).unwrap();
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_is_undefined() {
        assert!(distance_km(f64::NAN, 0.0, 0.0, 0.0).is_none());
        assert!(distance_km(0.0, f64::INFINITY, 0.0, 0.0).is_none());
        assert!(!within_radius(None, f64::MAX));
    }

    #[test]
    fn test_coordinate_parsing() {
        assert_eq!(coordinate(&json!(12.5)), Some(12.5));
        assert_eq!(coordinate(&json!("48.2")), Some(48.2));
        assert_eq!(coordinate(&json!("north")), None);
        assert_eq!(coordinate(&json!(null)), None);
        assert_eq!(coordinate(&json!([1, 2])), None);
    }

    #[test]
    fn test_proximity_radius() {
        let origin = Proximity::new(0.0, 0.0, 10.0);
        // 0.045 deg latitude is ~5 km, 0.45 deg ~50 km
        assert!(origin.contains(Some((0.045, 0.0))));
        assert!(!origin.contains(Some((0.45, 0.0))));
        assert!(!origin.contains(None));
    }
}
