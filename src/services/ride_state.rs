// src/services/ride_state.rs
//! Lifecycle rules for a ride. Every function here mutates a [`RideTx`]
//! working copy; the store only commits the copy when the function returns
//! `Ok`, so a failed guard leaves nothing half-applied.

use chrono::{DateTime, Utc};

use crate::{
    errors::{RideError, RideResult},
    models::{
        actor::{Actor, Role},
        driver::Driver,
        ride::{CancelledBy, PaymentStatus, Ride, RideAction, RideStatus},
        rider::Rider,
    },
    utils::id_generator::{IdGenerator, IdType},
};

pub const DEFAULT_CANCELLATION_REASON: &str = "No reason provided";
pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

/// The records a ride transition may touch, loaded together and committed together.
#[derive(Debug, Clone)]
pub struct RideTx {
    pub ride: Ride,
    pub rider: Rider,
    pub driver: Option<Driver>,
}

impl RideTx {
    fn driver_mut(&mut self) -> RideResult<&mut Driver> {
        let ride_id = &self.ride.id;
        self.driver.as_mut().ok_or_else(|| {
            RideError::Store(format!("ride {} has no driver loaded", ride_id))
        })
    }
}

pub struct RideStateMachine;

impl RideStateMachine {
    pub fn can_transition(from: RideStatus, to: RideStatus) -> bool {
        use RideStatus::*;
        match (from, to) {
            (Requested, Accepted) => true,
            (Accepted, Arrived) => true,
            (Arrived, InProgress) => true,
            (InProgress, Completed) => true,
            (Requested | Accepted | Arrived | InProgress, Cancelled) => true,
            _ => false,
        }
    }

    /// First-accept-wins: only a `requested` ride can be taken, and only by a
    /// verified, active driver with nothing else on whose vehicle matches the
    /// class that was booked.
    pub fn accept(tx: &mut RideTx, actor: &Actor, now: DateTime<Utc>) -> RideResult<()> {
        actor.require(Role::Driver)?;

        let from = tx.ride.status;
        if from != RideStatus::Requested {
            return Err(RideError::InvalidTransition {
                from,
                action: RideAction::Accept,
            });
        }

        let ride_id = tx.ride.id.clone();
        let booked_class = tx.ride.vehicle_class;
        let driver = tx.driver_mut()?;
        if driver.id != actor.id {
            return Err(RideError::forbidden("drivers can only accept rides for themselves"));
        }
        if !driver.is_verified || !driver.is_active {
            return Err(RideError::forbidden(
                "only verified, active drivers can accept rides",
            ));
        }
        if let Some(current) = &driver.current_ride_id {
            return Err(RideError::conflict(format!(
                "driver is already on ride {}",
                current
            )));
        }
        if !driver.is_available {
            return Err(RideError::conflict("driver is not available"));
        }
        if driver.vehicle.class != booked_class {
            return Err(RideError::conflict(format!(
                "ride was booked for a {} but the driver has a {}",
                booked_class, driver.vehicle.class
            )));
        }

        driver.lock_to(&ride_id, now);
        let driver_id = driver.id.clone();

        tx.ride.driver_id = Some(driver_id);
        tx.ride.status = RideStatus::Accepted;
        tx.ride.accepted_at = Some(now);
        tx.ride.updated_at = now;
        Ok(())
    }

    /// Moves an accepted ride forward: arrived, in-progress, completed.
    pub fn advance(
        tx: &mut RideTx,
        actor: &Actor,
        target: RideStatus,
        now: DateTime<Utc>,
    ) -> RideResult<()> {
        if !matches!(
            target,
            RideStatus::Arrived | RideStatus::InProgress | RideStatus::Completed
        ) {
            return Err(RideError::invalid_input(format!(
                "status can only be set to arrived, in-progress or completed, got {}",
                target
            )));
        }

        let from = tx.ride.status;
        if !Self::can_transition(from, target) {
            return Err(RideError::InvalidTransition {
                from,
                action: RideAction::Advance(target),
            });
        }

        if actor.role != Role::Admin && !tx.ride.is_assigned_driver(actor) {
            return Err(RideError::forbidden(
                "only the assigned driver can update this ride",
            ));
        }

        match target {
            RideStatus::Arrived => tx.ride.arrived_at = Some(now),
            RideStatus::InProgress => tx.ride.started_at = Some(now),
            RideStatus::Completed => Self::complete(tx, now)?,
            _ => {}
        }
        tx.ride.status = target;
        tx.ride.updated_at = now;
        Ok(())
    }

    fn complete(tx: &mut RideTx, now: DateTime<Utc>) -> RideResult<()> {
        let fare = tx.ride.fare.total;

        let driver = tx.driver_mut()?;
        driver.total_rides += 1;
        driver.earnings.credit(fare);
        driver.release(now);

        tx.rider.total_rides += 1;
        tx.rider.updated_at = now;

        tx.ride.completed_at = Some(now);
        tx.ride.payment.status = PaymentStatus::Completed;
        tx.ride.payment.transaction_id = Some(IdGenerator::generate(IdType::Payment));
        Ok(())
    }

    /// Cancels a non-terminal ride on behalf of its rider or assigned driver,
    /// releasing the driver if one was locked to it.
    pub fn cancel(
        tx: &mut RideTx,
        actor: &Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> RideResult<()> {
        if !tx.ride.is_party(actor) {
            return Err(RideError::forbidden(
                "only the rider or the assigned driver can cancel this ride",
            ));
        }

        let from = tx.ride.status;
        if !Self::can_transition(from, RideStatus::Cancelled) {
            return Err(RideError::InvalidTransition {
                from,
                action: RideAction::Cancel,
            });
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCELLATION_REASON.to_string());

        let ride_id = tx.ride.id.clone();
        if let Some(driver) = tx.driver.as_mut() {
            if driver.current_ride_id.as_deref() == Some(ride_id.as_str()) {
                driver.release(now);
            }
        }

        tx.ride.status = RideStatus::Cancelled;
        tx.ride.cancelled_at = Some(now);
        tx.ride.cancelled_by = Some(CancelledBy::from(actor.role));
        tx.ride.cancellation_reason = Some(reason);
        tx.ride.updated_at = now;
        Ok(())
    }

    /// Records one side's rating of the other on a completed ride and folds it
    /// into the rated party's running average.
    pub fn rate(tx: &mut RideTx, actor: &Actor, rating: f64, now: DateTime<Utc>) -> RideResult<()> {
        Self::validate_rating(rating)?;

        let from = tx.ride.status;
        if from != RideStatus::Completed {
            return Err(RideError::InvalidTransition {
                from,
                action: RideAction::Rate,
            });
        }

        if tx.ride.is_rider(actor) {
            if tx.ride.rating.driver_rating.is_some() {
                return Err(RideError::conflict("driver already rated for this ride"));
            }
            let driver = tx.driver_mut()?;
            driver.rating = running_average(driver.rating, driver.rating_count, rating);
            driver.rating_count += 1;
            driver.updated_at = now;
            tx.ride.rating.driver_rating = Some(rating);
        } else if tx.ride.is_assigned_driver(actor) {
            if tx.ride.rating.rider_rating.is_some() {
                return Err(RideError::conflict("rider already rated for this ride"));
            }
            let rider = &mut tx.rider;
            rider.rating = running_average(rider.rating, rider.rating_count, rating);
            rider.rating_count += 1;
            rider.updated_at = now;
            tx.ride.rating.rider_rating = Some(rating);
        } else {
            return Err(RideError::forbidden(
                "only the rider or the assigned driver can rate this ride",
            ));
        }

        tx.ride.updated_at = now;
        Ok(())
    }

    pub fn validate_rating(rating: f64) -> RideResult<()> {
        if !rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(RideError::invalid_input(format!(
                "rating must be between {} and {}, got {}",
                MIN_RATING, MAX_RATING, rating
            )));
        }
        Ok(())
    }
}

/// `count` is how many ratings `current` already averages.
pub fn running_average(current: f64, count: u32, rating: f64) -> f64 {
    let count = count as f64;
    (current * count + rating) / (count + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        driver::{DriverRegistration, Vehicle, VehicleClass},
        geo::{GeoPoint, Place},
        ride::{FareBreakdown, PaymentMethod},
        rider::RiderRegistration,
    };

    fn rider() -> Rider {
        Rider::new(RiderRegistration {
            name: "Kofi".to_string(),
            phone: "+233200000010".to_string(),
            email: "kofi@example.com".to_string(),
        })
    }

    fn ready_driver() -> Driver {
        let mut driver = Driver::new(DriverRegistration {
            name: "Esi".to_string(),
            phone: "+233200000011".to_string(),
            email: "esi@example.com".to_string(),
            license_number: "GH-5555".to_string(),
            vehicle: Vehicle {
                make: "Honda".to_string(),
                model: "Fit".to_string(),
                year: 2018,
                color: "Blue".to_string(),
                license_plate: "GT-1010-18".to_string(),
                class: VehicleClass::Sedan,
            },
            initial_position: None,
        });
        driver.is_verified = true;
        driver.is_available = true;
        driver
    }

    fn requested_tx() -> RideTx {
        let rider = rider();
        let point = GeoPoint::new(5.6037, -0.1870).unwrap();
        let ride = Ride::new(
            rider.id.clone(),
            Place::new(point, "Osu"),
            Place::new(point, "Labone"),
            VehicleClass::Sedan,
            FareBreakdown {
                base_fare: 3.0,
                per_km_rate: 1.5,
                distance_km: 10.0,
                total: 18.0,
            },
            PaymentMethod::Cash,
            Utc::now(),
        );
        RideTx {
            ride,
            rider,
            driver: Some(ready_driver()),
        }
    }

    fn driver_actor(tx: &RideTx) -> Actor {
        Actor::driver(tx.driver.as_ref().unwrap().id.clone())
    }

    fn rider_actor(tx: &RideTx) -> Actor {
        Actor::rider(tx.rider.id.clone())
    }

    fn completed_tx() -> RideTx {
        let mut tx = requested_tx();
        let driver = driver_actor(&tx);
        RideStateMachine::accept(&mut tx, &driver, Utc::now()).unwrap();
        for status in [RideStatus::Arrived, RideStatus::InProgress, RideStatus::Completed] {
            RideStateMachine::advance(&mut tx, &driver, status, Utc::now()).unwrap();
        }
        tx
    }

    #[test]
    fn test_transition_table() {
        use RideStatus::*;
        assert!(RideStateMachine::can_transition(Requested, Accepted));
        assert!(RideStateMachine::can_transition(InProgress, Completed));
        assert!(RideStateMachine::can_transition(Arrived, Cancelled));
        assert!(!RideStateMachine::can_transition(Requested, Completed));
        assert!(!RideStateMachine::can_transition(Accepted, InProgress));
        assert!(!RideStateMachine::can_transition(Completed, Cancelled));
        assert!(!RideStateMachine::can_transition(Cancelled, Accepted));
    }

    #[test]
    fn test_accept_locks_driver() {
        let mut tx = requested_tx();
        let driver = driver_actor(&tx);
        RideStateMachine::accept(&mut tx, &driver, Utc::now()).unwrap();

        assert_eq!(tx.ride.status, RideStatus::Accepted);
        assert_eq!(tx.ride.driver_id.as_deref(), Some(driver.id.as_str()));
        assert!(tx.ride.accepted_at.is_some());
        let locked = tx.driver.as_ref().unwrap();
        assert_eq!(locked.current_ride_id.as_deref(), Some(tx.ride.id.as_str()));
        assert!(!locked.is_available);
    }

    #[test]
    fn test_second_accept_reports_unavailable() {
        let mut tx = requested_tx();
        let driver = driver_actor(&tx);
        RideStateMachine::accept(&mut tx, &driver, Utc::now()).unwrap();

        tx.driver = Some(ready_driver());
        let other = driver_actor(&tx);
        let err = RideStateMachine::accept(&mut tx, &other, Utc::now()).unwrap_err();
        assert!(err.is_lost_race());
    }

    #[test]
    fn test_accept_requires_verified_available_driver() {
        let mut tx = requested_tx();
        tx.driver.as_mut().unwrap().is_verified = false;
        let driver = driver_actor(&tx);
        assert!(matches!(
            RideStateMachine::accept(&mut tx, &driver, Utc::now()),
            Err(RideError::Forbidden(_))
        ));

        let mut tx = requested_tx();
        tx.driver.as_mut().unwrap().is_available = false;
        let driver = driver_actor(&tx);
        assert!(matches!(
            RideStateMachine::accept(&mut tx, &driver, Utc::now()),
            Err(RideError::Conflict(_))
        ));
        assert_eq!(tx.ride.status, RideStatus::Requested);

        let mut tx = requested_tx();
        let rider = rider_actor(&tx);
        assert!(matches!(
            RideStateMachine::accept(&mut tx, &rider, Utc::now()),
            Err(RideError::Forbidden(_))
        ));
    }

    #[test]
    fn test_accept_requires_booked_vehicle_class() {
        let mut tx = requested_tx();
        tx.ride.vehicle_class = VehicleClass::Luxury;
        let driver = driver_actor(&tx);
        assert!(matches!(
            RideStateMachine::accept(&mut tx, &driver, Utc::now()),
            Err(RideError::Conflict(_))
        ));
        assert_eq!(tx.ride.status, RideStatus::Requested);
        assert!(tx.driver.as_ref().unwrap().current_ride_id.is_none());
    }

    #[test]
    fn test_skipping_a_step_is_rejected_before_permission() {
        let mut tx = requested_tx();
        let driver = driver_actor(&tx);
        RideStateMachine::accept(&mut tx, &driver, Utc::now()).unwrap();

        // Illegal pair wins over the wrong actor
        let stranger = Actor::driver("drv-251018-zzz99");
        assert!(matches!(
            RideStateMachine::advance(&mut tx, &stranger, RideStatus::Completed, Utc::now()),
            Err(RideError::InvalidTransition { from: RideStatus::Accepted, .. })
        ));
        assert!(matches!(
            RideStateMachine::advance(&mut tx, &stranger, RideStatus::Arrived, Utc::now()),
            Err(RideError::Forbidden(_))
        ));
        assert!(matches!(
            RideStateMachine::advance(&mut tx, &driver, RideStatus::Cancelled, Utc::now()),
            Err(RideError::InvalidInput(_))
        ));

        // Admins may move any ride along
        RideStateMachine::advance(&mut tx, &Actor::admin("ops"), RideStatus::Arrived, Utc::now())
            .unwrap();
        assert_eq!(tx.ride.status, RideStatus::Arrived);
    }

    #[test]
    fn test_completion_settles_payment_and_releases_driver() {
        let tx = completed_tx();

        assert_eq!(tx.ride.status, RideStatus::Completed);
        assert!(tx.ride.completed_at.is_some());
        assert_eq!(tx.ride.payment.status, PaymentStatus::Completed);
        assert!(
            tx.ride
                .payment
                .transaction_id
                .as_deref()
                .is_some_and(|id| id.starts_with("pay-"))
        );

        let driver = tx.driver.as_ref().unwrap();
        assert_eq!(driver.total_rides, 1);
        assert_eq!(driver.earnings.total, 18.0);
        assert_eq!(driver.earnings.daily, 18.0);
        assert!(driver.current_ride_id.is_none());
        assert!(driver.is_available);
        assert_eq!(tx.rider.total_rides, 1);
    }

    #[test]
    fn test_cancel_rules() {
        let mut tx = requested_tx();
        let stranger = Actor::rider("usr-251018-zzz99");
        assert!(matches!(
            RideStateMachine::cancel(&mut tx, &stranger, None, Utc::now()),
            Err(RideError::Forbidden(_))
        ));

        let driver = driver_actor(&tx);
        RideStateMachine::accept(&mut tx, &driver, Utc::now()).unwrap();
        RideStateMachine::cancel(&mut tx, &driver, Some("  ".to_string()), Utc::now()).unwrap();

        assert_eq!(tx.ride.status, RideStatus::Cancelled);
        assert_eq!(tx.ride.cancelled_by, Some(CancelledBy::Driver));
        assert_eq!(
            tx.ride.cancellation_reason.as_deref(),
            Some(DEFAULT_CANCELLATION_REASON)
        );
        let released = tx.driver.as_ref().unwrap();
        assert!(released.current_ride_id.is_none());
        assert!(released.is_available);

        let rider = rider_actor(&tx);
        assert!(matches!(
            RideStateMachine::cancel(&mut tx, &rider, None, Utc::now()),
            Err(RideError::InvalidTransition {
                from: RideStatus::Cancelled,
                action: RideAction::Cancel
            })
        ));
    }

    #[test]
    fn test_cannot_cancel_completed_ride() {
        let mut tx = completed_tx();
        let rider = rider_actor(&tx);
        assert!(matches!(
            RideStateMachine::cancel(&mut tx, &rider, None, Utc::now()),
            Err(RideError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_rating_running_average() {
        let mut tx = completed_tx();
        let rider = rider_actor(&tx);
        RideStateMachine::rate(&mut tx, &rider, 3.0, Utc::now()).unwrap();
        assert_eq!(tx.driver.as_ref().unwrap().rating, 3.0);
        assert_eq!(tx.ride.rating.driver_rating, Some(3.0));

        assert!(matches!(
            RideStateMachine::rate(&mut tx, &rider, 5.0, Utc::now()),
            Err(RideError::Conflict(_))
        ));

        // Second ride for the same driver
        let rated_driver = tx.driver.clone().unwrap();
        let mut next = completed_tx();
        let mut carried = rated_driver;
        carried.current_ride_id = None;
        next.ride.driver_id = Some(carried.id.clone());
        next.driver = Some(carried);
        let next_rider = rider_actor(&next);
        RideStateMachine::rate(&mut next, &next_rider, 5.0, Utc::now()).unwrap();
        assert_eq!(next.driver.as_ref().unwrap().rating, 4.0);
        assert_eq!(next.driver.as_ref().unwrap().rating_count, 2);
    }

    #[test]
    fn test_driver_rates_rider() {
        let mut tx = completed_tx();
        let driver = driver_actor(&tx);
        RideStateMachine::rate(&mut tx, &driver, 4.0, Utc::now()).unwrap();
        assert_eq!(tx.rider.rating, 4.0);
        assert_eq!(tx.ride.rating.rider_rating, Some(4.0));

        assert!(matches!(
            RideStateMachine::rate(&mut tx, &Actor::admin("ops"), 4.0, Utc::now()),
            Err(RideError::Forbidden(_))
        ));
    }

    #[test]
    fn test_rating_guards() {
        let mut tx = requested_tx();
        let rider = rider_actor(&tx);
        assert!(matches!(
            RideStateMachine::rate(&mut tx, &rider, 4.0, Utc::now()),
            Err(RideError::InvalidTransition { action: RideAction::Rate, .. })
        ));

        let mut tx = completed_tx();
        let rider = rider_actor(&tx);
        for bad in [0.0, 5.5, f64::NAN] {
            assert!(matches!(
                RideStateMachine::rate(&mut tx, &rider, bad, Utc::now()),
                Err(RideError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_running_average() {
        assert_eq!(running_average(5.0, 0, 3.0), 3.0);
        assert_eq!(running_average(3.0, 1, 5.0), 4.0);
        assert_eq!(running_average(4.0, 3, 4.0), 4.0);
    }
}
