// src/services/fare.rs
//! Trip pricing: a flat base fare plus a per-kilometer rate, both fixed per
//! vehicle class.

use crate::{
    errors::{RideError, RideResult},
    models::{driver::VehicleClass, geo::GeoPoint, ride::FareBreakdown},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareRate {
    pub base_fare: f64,
    pub per_km_rate: f64,
}

pub struct FareCalculator;

impl FareCalculator {
    pub fn rate_for(class: VehicleClass) -> FareRate {
        let (base_fare, per_km_rate) = match class {
            VehicleClass::Sedan => (3.0, 1.5),
            VehicleClass::Suv => (5.0, 2.0),
            VehicleClass::Luxury => (10.0, 3.5),
            VehicleClass::Van => (7.0, 2.5),
        };
        FareRate {
            base_fare,
            per_km_rate,
        }
    }

    /// `total = base + km * rate`, rounded to cents.
    pub fn estimate(distance_meters: f64, class: VehicleClass) -> RideResult<FareBreakdown> {
        if !distance_meters.is_finite() || distance_meters < 0.0 {
            return Err(RideError::invalid_input(format!(
                "distance must be a non-negative number of meters, got {}",
                distance_meters
            )));
        }

        let rate = Self::rate_for(class);
        let distance_km = distance_meters / 1000.0;
        let total = round_to_cents(rate.base_fare + distance_km * rate.per_km_rate);

        Ok(FareBreakdown {
            base_fare: rate.base_fare,
            per_km_rate: rate.per_km_rate,
            distance_km,
            total,
        })
    }

    /// Prices the straight-line trip between two points, measured in whole meters.
    pub fn estimate_between(
        pickup: &GeoPoint,
        dropoff: &GeoPoint,
        class: VehicleClass,
    ) -> RideResult<FareBreakdown> {
        pickup.validate()?;
        dropoff.validate()?;
        let distance_meters = pickup.distance_meters(dropoff).round();
        Self::estimate(distance_meters, class)
    }
}

fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sedan_ten_km() {
        let fare = FareCalculator::estimate(10_000.0, VehicleClass::Sedan).unwrap();
        assert_eq!(
            fare,
            FareBreakdown {
                base_fare: 3.0,
                per_km_rate: 1.5,
                distance_km: 10.0,
                total: 18.0,
            }
        );
    }

    #[test]
    fn test_rate_table() {
        assert_eq!(FareCalculator::estimate(2_000.0, VehicleClass::Suv).unwrap().total, 9.0);
        assert_eq!(FareCalculator::estimate(2_000.0, VehicleClass::Luxury).unwrap().total, 17.0);
        assert_eq!(FareCalculator::estimate(2_000.0, VehicleClass::Van).unwrap().total, 12.0);
        assert_eq!(FareCalculator::estimate(0.0, VehicleClass::Sedan).unwrap().total, 3.0);
    }

    #[test]
    fn test_total_rounds_to_cents() {
        // 3 + 1.2345 * 1.5 = 4.85175
        let fare = FareCalculator::estimate(1_234.5, VehicleClass::Sedan).unwrap();
        assert_eq!(fare.total, 4.85);
        assert_eq!(fare.distance_km, 1.2345);
    }

    #[test]
    fn test_rejects_negative_distance() {
        assert!(matches!(
            FareCalculator::estimate(-1.0, VehicleClass::Sedan),
            Err(RideError::InvalidInput(_))
        ));
        assert!(FareCalculator::estimate(f64::NAN, VehicleClass::Sedan).is_err());
    }

    #[test]
    fn test_estimate_between_points() {
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(0.0, 0.1).unwrap();
        let fare = FareCalculator::estimate_between(&a, &b, VehicleClass::Sedan).unwrap();
        // 11 119 m along the equator
        assert_eq!(fare.distance_km, 11.119);
        assert_eq!(fare.total, 19.68);
    }
}
