//! # Geographic Coordinates
//!
//! Logistics staff report where a pickup or delivery actually happened.
//! Coordinates are range-checked and rounded to six decimal places (about
//! 11 cm), the precision stored by the database.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = ValidationError;

    fn try_from(raw: RawGeoPoint) -> Result<Self, Self::Error> {
        GeoPoint::new(raw.latitude, raw.longitude)
    }
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

impl GeoPoint {
    /// # Errors
    ///
    /// Returns [`ValidationError::LatitudeOutOfRange`] or
    /// [`ValidationError::LongitudeOutOfRange`] for out-of-range or
    /// non-finite values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::LatitudeOutOfRange(latitude.to_string()));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::LongitudeOutOfRange(longitude.to_string()));
        }
        Ok(Self {
            latitude: round6(latitude),
            longitude: round6(longitude),
        })
    }

    /// Build from optional halves; both must be present or both absent.
    ///
    /// # Errors
    ///
    /// A lone latitude or longitude is reported as out of range for the
    /// missing half, alongside the usual range errors.
    pub fn from_parts(
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Option<Self>, ValidationError> {
        match (latitude, longitude) {
            (None, None) => Ok(None),
            (Some(lat), Some(lon)) => Self::new(lat, lon).map(Some),
            (Some(_), None) => Err(ValidationError::LongitudeOutOfRange("missing".into())),
            (None, Some(_)) => Err(ValidationError::LatitudeOutOfRange("missing".into())),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_boundaries() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
        assert!(GeoPoint::new(28.613939, 77.209023).is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            GeoPoint::new(90.000001, 0.0),
            Err(ValidationError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            GeoPoint::new(0.0, -180.5),
            Err(ValidationError::LongitudeOutOfRange(_))
        ));
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn rounds_to_six_places() {
        let p = GeoPoint::new(12.971598765, 77.594562999).unwrap();
        assert_eq!(p.latitude(), 12.971599);
        assert_eq!(p.longitude(), 77.594563);
    }

    #[test]
    fn from_parts_requires_both_halves() {
        assert_eq!(GeoPoint::from_parts(None, None).unwrap(), None);
        assert!(GeoPoint::from_parts(Some(1.0), Some(2.0)).unwrap().is_some());
        assert!(GeoPoint::from_parts(Some(1.0), None).is_err());
        assert!(GeoPoint::from_parts(None, Some(2.0)).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<GeoPoint, _> =
            serde_json::from_str(r#"{"latitude": 19.07, "longitude": 72.87}"#);
        assert!(ok.is_ok());
        let bad: Result<GeoPoint, _> =
            serde_json::from_str(r#"{"latitude": 91.0, "longitude": 72.87}"#);
        assert!(bad.is_err());
    }
}
