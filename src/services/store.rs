// src/services/store.rs
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::{
    errors::{RideError, RideResult},
    models::{
        driver::Driver,
        ride::{Ride, RoutePoint},
        rider::Rider,
    },
    services::ride_state::RideTx,
};

pub type TxOp = Box<dyn FnOnce(&mut RideTx) -> RideResult<()> + Send>;
pub type DriverOp = Box<dyn FnOnce(&mut Driver) -> RideResult<()> + Send>;
pub type RiderOp = Box<dyn FnOnce(&mut Rider) -> RideResult<()> + Send>;

/// Persistence boundary for riders, drivers and rides.
///
/// Every committed change to a driver bumps `Driver::version`, which gives
/// copies held elsewhere an order to compare against.
///
/// `transact` is the only way a ride changes after creation: it loads the
/// ride, its rider and one driver, runs `op` on copies and commits all three
/// at once, or nothing if `op` fails. Concurrent transactions on the same ride
/// are serialized.
#[async_trait]
pub trait RideStore: Send + Sync {
    async fn insert_rider(&self, rider: Rider) -> RideResult<Rider>;
    async fn insert_driver(&self, driver: Driver) -> RideResult<Driver>;
    async fn get_rider(&self, rider_id: &str) -> RideResult<Option<Rider>>;
    async fn get_driver(&self, driver_id: &str) -> RideResult<Option<Driver>>;
    async fn get_ride(&self, ride_id: &str) -> RideResult<Option<Ride>>;
    async fn list_drivers(&self) -> RideResult<Vec<Driver>>;

    /// Stores a new `requested` ride. Fails with `Conflict` while the rider
    /// still has a ride that is not completed or cancelled.
    async fn create_ride(&self, ride: Ride) -> RideResult<Ride>;

    /// Runs `op` against the ride, its rider and a driver. The driver is
    /// `driver_id` when given, otherwise the ride's assigned driver, if any.
    async fn transact(&self, ride_id: &str, driver_id: Option<&str>, op: TxOp)
    -> RideResult<RideTx>;

    async fn update_driver(&self, driver_id: &str, op: DriverOp) -> RideResult<Driver>;
    async fn update_rider(&self, rider_id: &str, op: RiderOp) -> RideResult<Rider>;

    /// Appends to the ride's route while a driver is on it. Returns the updated
    /// ride, or `None` when the ride is not in an active state.
    async fn append_route_point(&self, ride_id: &str, point: RoutePoint) -> RideResult<Option<Ride>>;

    async fn open_ride_for_rider(&self, rider_id: &str) -> RideResult<Option<Ride>>;
    async fn rides_for_rider(&self, rider_id: &str, limit: usize) -> RideResult<Vec<Ride>>;
    async fn rides_for_driver(&self, driver_id: &str, limit: usize) -> RideResult<Vec<Ride>>;
}

#[derive(Default)]
struct Ledger {
    riders: HashMap<String, Rider>,
    drivers: HashMap<String, Driver>,
    rides: HashMap<String, Ride>,
    ride_log: Vec<String>, // Creation order
}

impl Ledger {
    fn history<F>(&self, limit: usize, belongs: F) -> Vec<Ride>
    where
        F: Fn(&Ride) -> bool,
    {
        self.ride_log
            .iter()
            .rev()
            .filter_map(|id| self.rides.get(id))
            .filter(|ride| belongs(ride))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// A ride with a driver attached must be mirrored on the driver, and an
/// engaged driver is never available.
fn check_consistency(tx: &RideTx) -> RideResult<()> {
    let ride = &tx.ride;
    if let Some(driver) = &tx.driver {
        if !driver.is_consistent() {
            return Err(RideError::Store(format!(
                "driver {} would be available while on a ride",
                driver.id
            )));
        }
    }

    if ride.status.is_active() {
        let locked = tx.driver.as_ref().is_some_and(|driver| {
            ride.driver_id.as_deref() == Some(driver.id.as_str())
                && driver.current_ride_id.as_deref() == Some(ride.id.as_str())
        });
        if !locked {
            return Err(RideError::Store(format!(
                "ride {} is {} but its driver is not locked to it",
                ride.id, ride.status
            )));
        }
    } else if let Some(driver) = &tx.driver {
        if driver.current_ride_id.as_deref() == Some(ride.id.as_str()) {
            return Err(RideError::Store(format!(
                "driver {} is still locked to {} ride {}",
                driver.id, ride.status, ride.id
            )));
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn insert_rider(&self, rider: Rider) -> RideResult<Rider> {
        let mut ledger = self.ledger.lock().await;
        if ledger.riders.contains_key(&rider.id) {
            return Err(RideError::conflict(format!("rider {} already exists", rider.id)));
        }
        ledger.riders.insert(rider.id.clone(), rider.clone());
        Ok(rider)
    }

    async fn insert_driver(&self, driver: Driver) -> RideResult<Driver> {
        let mut ledger = self.ledger.lock().await;
        if ledger.drivers.contains_key(&driver.id) {
            return Err(RideError::conflict(format!("driver {} already exists", driver.id)));
        }
        ledger.drivers.insert(driver.id.clone(), driver.clone());
        Ok(driver)
    }

    async fn get_rider(&self, rider_id: &str) -> RideResult<Option<Rider>> {
        Ok(self.ledger.lock().await.riders.get(rider_id).cloned())
    }

    async fn get_driver(&self, driver_id: &str) -> RideResult<Option<Driver>> {
        Ok(self.ledger.lock().await.drivers.get(driver_id).cloned())
    }

    async fn get_ride(&self, ride_id: &str) -> RideResult<Option<Ride>> {
        Ok(self.ledger.lock().await.rides.get(ride_id).cloned())
    }

    async fn list_drivers(&self) -> RideResult<Vec<Driver>> {
        Ok(self.ledger.lock().await.drivers.values().cloned().collect())
    }

    async fn create_ride(&self, ride: Ride) -> RideResult<Ride> {
        let mut ledger = self.ledger.lock().await;

        if !ledger.riders.contains_key(&ride.rider_id) {
            return Err(RideError::rider_not_found(&ride.rider_id));
        }
        if ledger.rides.contains_key(&ride.id) {
            return Err(RideError::conflict(format!("ride {} already exists", ride.id)));
        }
        if let Some(open) = ledger
            .rides
            .values()
            .find(|r| r.rider_id == ride.rider_id && !r.status.is_terminal())
        {
            return Err(RideError::conflict(format!(
                "rider already has an open ride {} ({})",
                open.id, open.status
            )));
        }

        ledger.ride_log.push(ride.id.clone());
        ledger.rides.insert(ride.id.clone(), ride.clone());
        Ok(ride)
    }

    async fn transact(
        &self,
        ride_id: &str,
        driver_id: Option<&str>,
        op: TxOp,
    ) -> RideResult<RideTx> {
        let mut ledger = self.ledger.lock().await;

        let ride = ledger
            .rides
            .get(ride_id)
            .cloned()
            .ok_or_else(|| RideError::ride_not_found(ride_id))?;
        let rider = ledger
            .riders
            .get(&ride.rider_id)
            .cloned()
            .ok_or_else(|| RideError::rider_not_found(&ride.rider_id))?;
        let driver = match driver_id.or(ride.driver_id.as_deref()) {
            Some(id) => Some(
                ledger
                    .drivers
                    .get(id)
                    .cloned()
                    .ok_or_else(|| RideError::driver_not_found(id))?,
            ),
            None => None,
        };

        let mut tx = RideTx { ride, rider, driver };
        op(&mut tx)?;
        check_consistency(&tx)?;

        tx.ride.version += 1;
        if let Some(driver) = tx.driver.as_mut() {
            driver.version += 1;
        }
        ledger.rides.insert(tx.ride.id.clone(), tx.ride.clone());
        ledger.riders.insert(tx.rider.id.clone(), tx.rider.clone());
        if let Some(driver) = &tx.driver {
            ledger.drivers.insert(driver.id.clone(), driver.clone());
        }
        Ok(tx)
    }

    async fn update_driver(&self, driver_id: &str, op: DriverOp) -> RideResult<Driver> {
        let mut ledger = self.ledger.lock().await;
        let mut driver = ledger
            .drivers
            .get(driver_id)
            .cloned()
            .ok_or_else(|| RideError::driver_not_found(driver_id))?;

        let engaged_before = driver.current_ride_id.clone();
        op(&mut driver)?;
        if driver.current_ride_id != engaged_before {
            return Err(RideError::Internal(
                "ride engagement can only change through a ride transaction".to_string(),
            ));
        }
        if !driver.is_consistent() {
            return Err(RideError::conflict("a driver on a ride cannot go available"));
        }

        driver.version += 1;
        ledger.drivers.insert(driver.id.clone(), driver.clone());
        Ok(driver)
    }

    async fn update_rider(&self, rider_id: &str, op: RiderOp) -> RideResult<Rider> {
        let mut ledger = self.ledger.lock().await;
        let mut rider = ledger
            .riders
            .get(rider_id)
            .cloned()
            .ok_or_else(|| RideError::rider_not_found(rider_id))?;
        op(&mut rider)?;
        ledger.riders.insert(rider.id.clone(), rider.clone());
        Ok(rider)
    }

    async fn append_route_point(&self, ride_id: &str, point: RoutePoint) -> RideResult<Option<Ride>> {
        let mut ledger = self.ledger.lock().await;
        let ride = ledger
            .rides
            .get_mut(ride_id)
            .ok_or_else(|| RideError::ride_not_found(ride_id))?;
        if !ride.status.is_active() {
            return Ok(None);
        }
        ride.route.push(point);
        ride.version += 1;
        ride.updated_at = Utc::now();
        Ok(Some(ride.clone()))
    }

    async fn open_ride_for_rider(&self, rider_id: &str) -> RideResult<Option<Ride>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .history(1, |ride| ride.rider_id == rider_id && !ride.status.is_terminal())
            .into_iter()
            .next())
    }

    async fn rides_for_rider(&self, rider_id: &str, limit: usize) -> RideResult<Vec<Ride>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.history(limit, |ride| ride.rider_id == rider_id))
    }

    async fn rides_for_driver(&self, driver_id: &str, limit: usize) -> RideResult<Vec<Ride>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.history(limit, |ride| ride.driver_id.as_deref() == Some(driver_id)))
    }
}
