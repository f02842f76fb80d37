//! Geographic primitives: coordinates, geofences and location samples.
//!
//! Distances use the haversine great-circle formula on a spherical earth,
//! which is accurate to well under a meter at geofence scale.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Earth's mean radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a new coordinate.
    #[inline]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns true if both components are finite and in range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let (lat1, lon1) = (self.latitude.to_radians(), self.longitude.to_radians());
        let (lat2, lon2) = (other.latitude.to_radians(), other.longitude.to_radians());

        let d_lat = lat2 - lat1;
        let d_lon = lon2 - lon1;

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Returns the point reached by moving `meters` due north.
    ///
    /// Handy for building test fixtures at a known distance.
    pub fn offset_north(&self, meters: f64) -> Coordinate {
        let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
        Coordinate::new(self.latitude + d_lat, self.longitude)
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self::new(lat, lon)
    }
}

/// A circular eligibility region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    /// Center of the region.
    pub center: Coordinate,
    /// Radius in meters.
    pub radius_m: f64,
}

impl Geofence {
    /// Creates a geofence.
    pub const fn new(center: Coordinate, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// Returns true if the center is valid and the radius positive.
    pub fn is_valid(&self) -> bool {
        self.center.is_valid() && self.radius_m.is_finite() && self.radius_m > 0.0
    }

    /// Returns true if `point` lies inside or on the boundary.
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// A single geolocation reading from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Reported position.
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters.
    pub accuracy_m: f64,
    /// When the reading was taken.
    pub timestamp: Timestamp,
}

impl LocationSample {
    /// Creates a sample.
    pub fn new(coordinate: Coordinate, accuracy_m: f64, timestamp: Timestamp) -> Self {
        Self {
            coordinate,
            accuracy_m,
            timestamp,
        }
    }

    /// Returns true if the coordinate is valid and accuracy non-negative.
    pub fn is_valid(&self) -> bool {
        self.coordinate.is_valid() && self.accuracy_m.is_finite() && self.accuracy_m >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BERLIN: Coordinate = Coordinate::new(52.5200, 13.4050);
    const PARIS: Coordinate = Coordinate::new(48.8566, 2.3522);

    #[test]
    fn berlin_to_paris() {
        let distance = BERLIN.distance_m(&PARIS);
        assert!((distance - 878_000.0).abs() < 5_000.0, "Berlin-Paris: {distance}");
    }

    #[test]
    fn same_point_zero_distance() {
        assert!(BERLIN.distance_m(&BERLIN).abs() < 1e-6);
    }

    #[test]
    fn offset_north_matches_distance() {
        let moved = BERLIN.offset_north(600.0);
        assert!((BERLIN.distance_m(&moved) - 600.0).abs() < 0.5);
    }

    #[test]
    fn geofence_boundary() {
        let fence = Geofence::new(BERLIN, 500.0);
        assert!(fence.contains(&BERLIN.offset_north(499.0)));
        assert!(!fence.contains(&BERLIN.offset_north(600.0)));
    }

    #[test]
    fn coordinate_validation() {
        assert!(Coordinate::new(0.0, 0.0).is_valid());
        assert!(Coordinate::new(90.0, 180.0).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
        assert!(!Geofence::new(BERLIN, 0.0).is_valid());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn coordinate() -> impl Strategy<Value = Coordinate> {
            (-89.0f64..89.0, -179.0f64..179.0).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
        }

        proptest! {
            #[test]
            fn distance_is_symmetric(a in coordinate(), b in coordinate()) {
                let ab = a.distance_m(&b);
                let ba = b.distance_m(&a);
                prop_assert!(ab >= 0.0);
                prop_assert!((ab - ba).abs() < 1e-6);
            }

            #[test]
            fn fence_contains_nearby_points(center in coordinate(), meters in 0.0f64..400.0) {
                let fence = Geofence::new(center, 500.0);
                prop_assert!(fence.contains(&center.offset_north(meters)));
            }
        }
    }
}
