use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceProfile;
use super::error::LocationError;
use super::sensor::RawReading;

/// True iff `latitude` is within [-90, 90] and `longitude` within [-180, 180].
pub fn validate_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

/// A validated position fix.
///
/// Built from live sensor input by [`Position::from_reading`] and from stored
/// JSON through the same checks, so a `Position` in memory always has
/// in-range coordinates and a finite, non-negative accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PositionRecord")]
pub struct Position {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    captured_at: DateTime<Utc>,
    altitude: Option<f64>,
    altitude_accuracy: Option<f64>,
    heading: Option<f64>,
    speed: Option<f64>,
    device: DeviceProfile,
}

/// Stored form of a [`Position`], checked before it becomes one.
#[derive(Deserialize)]
struct PositionRecord {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    captured_at: DateTime<Utc>,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    altitude_accuracy: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    device: DeviceProfile,
}

impl TryFrom<PositionRecord> for Position {
    type Error = LocationError;

    fn try_from(record: PositionRecord) -> Result<Self, Self::Error> {
        let reading = RawReading {
            latitude: record.latitude,
            longitude: record.longitude,
            accuracy: record.accuracy,
            altitude: record.altitude,
            altitude_accuracy: record.altitude_accuracy,
            heading: record.heading,
            speed: record.speed,
        };
        Position::from_reading(&reading, &record.device, record.captured_at)
    }
}

impl Position {
    pub fn from_reading(
        reading: &RawReading,
        device: &DeviceProfile,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, LocationError> {
        if !validate_coordinates(reading.latitude, reading.longitude) {
            return Err(LocationError::InvalidCoordinates {
                latitude: reading.latitude,
                longitude: reading.longitude,
            });
        }
        // NaN fails every comparison, so this also rejects a NaN accuracy.
        if !(reading.accuracy >= 0.0 && reading.accuracy.is_finite()) {
            return Err(LocationError::InvalidCoordinates {
                latitude: reading.latitude,
                longitude: reading.longitude,
            });
        }

        Ok(Self {
            latitude: reading.latitude,
            longitude: reading.longitude,
            accuracy: reading.accuracy,
            captured_at,
            altitude: reading.altitude,
            altitude_accuracy: reading.altitude_accuracy,
            heading: reading.heading,
            speed: reading.speed,
            device: device.clone(),
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Horizontal accuracy radius in meters.
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn altitude_accuracy(&self) -> Option<f64> {
        self.altitude_accuracy
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    /// Strictly more accurate than `other`.
    pub fn is_better_than(&self, other: &Position) -> bool {
        self.accuracy < other.accuracy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundaries_are_inclusive() {
        assert!(validate_coordinates(90.0, 180.0));
        assert!(validate_coordinates(-90.0, -180.0));
        assert!(validate_coordinates(0.0, 0.0));
    }

    #[test]
    fn just_outside_is_rejected() {
        assert!(!validate_coordinates(90.000_001, 0.0));
        assert!(!validate_coordinates(-90.000_001, 0.0));
        assert!(!validate_coordinates(0.0, 180.000_001));
        assert!(!validate_coordinates(0.0, -180.000_001));
        assert!(!validate_coordinates(f64::NAN, 0.0));
        assert!(!validate_coordinates(0.0, f64::INFINITY));
    }

    proptest! {
        #[test]
        fn validate_matches_range_definition(lat in -200.0f64..200.0, lon in -400.0f64..400.0) {
            let expected = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon);
            prop_assert_eq!(validate_coordinates(lat, lon), expected);
        }

        #[test]
        fn in_range_readings_always_build(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0, acc in 0.0f64..5000.0) {
            let reading = RawReading::new(lat, lon, acc);
            let position = Position::from_reading(&reading, &DeviceProfile::default(), Utc::now()).unwrap();
            prop_assert_eq!(position.latitude(), lat);
            prop_assert_eq!(position.accuracy(), acc);
        }
    }

    #[test]
    fn out_of_range_reading_is_never_stored() {
        let reading = RawReading::new(91.0, 10.0, 5.0);
        let err = Position::from_reading(&reading, &DeviceProfile::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LocationError::InvalidCoordinates { .. }));
    }

    #[test]
    fn negative_or_nan_accuracy_is_rejected() {
        for accuracy in [-1.0, f64::NAN, f64::INFINITY] {
            let reading = RawReading::new(10.0, 10.0, accuracy);
            assert!(
                Position::from_reading(&reading, &DeviceProfile::default(), Utc::now()).is_err()
            );
        }
    }

    #[test]
    fn stored_positions_are_revalidated() {
        let reading = RawReading::new(-23.55, -46.63, 4.0);
        let position =
            Position::from_reading(&reading, &DeviceProfile::default(), Utc::now()).unwrap();
        let json = serde_json::to_string(&position).unwrap();
        let restored: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, position);

        let mut record: serde_json::Value = serde_json::from_str(&json).unwrap();
        record["latitude"] = 500.0.into();
        record["longitude"] = (-999.0).into();
        assert!(serde_json::from_value::<Position>(record.clone()).is_err());

        record["latitude"] = 10.0.into();
        record["longitude"] = 10.0.into();
        record["accuracy"] = (-7.0).into();
        assert!(serde_json::from_value::<Position>(record).is_err());
    }

    #[test]
    fn optional_kinematics_carry_over() {
        let mut reading = RawReading::new(-23.55, -46.63, 4.0);
        reading.altitude = Some(760.0);
        reading.heading = Some(90.0);
        reading.speed = Some(1.5);
        let position =
            Position::from_reading(&reading, &DeviceProfile::default(), Utc::now()).unwrap();
        assert_eq!(position.altitude(), Some(760.0));
        assert_eq!(position.heading(), Some(90.0));
        assert_eq!(position.speed(), Some(1.5));
        assert_eq!(position.altitude_accuracy(), None);
    }
}
