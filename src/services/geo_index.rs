// src/services/geo_index.rs
//! Live driver positions and eligibility, answering "who can take a ride near
//! this point".
//!
//! Positions are stored in an R-tree as 3-D points on a sphere scaled to the
//! earth radius. Straight-line (chord) distance between two such points grows
//! monotonically with great-circle distance, so the tree's nearest-neighbor
//! iterator already yields drivers nearest-first and the scan can stop at the
//! first driver beyond the search radius.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{
    errors::{RideError, RideResult},
    models::{
        driver::{Driver, VehicleClass},
        geo::{EARTH_RADIUS_METERS, GeoPoint},
    },
};

pub const DISPATCH_CANDIDATE_LIMIT: usize = 10;
pub const NEARBY_QUERY_LIMIT: usize = 20;
pub const DEFAULT_SEARCH_RADIUS_METERS: f64 = 5000.0;

#[derive(Debug, Clone, PartialEq)]
struct IndexedPoint {
    position: [f64; 3],
    driver_id: String,
}

impl IndexedPoint {
    fn new(point: &GeoPoint, driver_id: &str) -> Self {
        Self {
            position: to_cartesian(point),
            driver_id: driver_id.to_string(),
        }
    }
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        self.position
            .iter()
            .zip(point.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

fn to_cartesian(point: &GeoPoint) -> [f64; 3] {
    let lat = point.latitude.to_radians();
    let lng = point.longitude.to_radians();
    [
        EARTH_RADIUS_METERS * lat.cos() * lng.cos(),
        EARTH_RADIUS_METERS * lat.cos() * lng.sin(),
        EARTH_RADIUS_METERS * lat.sin(),
    ]
}

/// What the index knows about a driver, as of store commit `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDriver {
    pub driver_id: String,
    pub position: Option<GeoPoint>,
    pub heading: f64,
    pub vehicle_class: VehicleClass,
    pub is_available: bool,
    pub is_active: bool,
    pub is_verified: bool,
    pub current_ride_id: Option<String>,
    pub version: u64,
}

impl IndexedDriver {
    pub fn is_eligible_for(&self, class: VehicleClass) -> bool {
        self.is_available
            && self.is_active
            && self.is_verified
            && self.current_ride_id.is_none()
            && self.vehicle_class == class
    }
}

impl From<&Driver> for IndexedDriver {
    fn from(driver: &Driver) -> Self {
        Self {
            driver_id: driver.id.clone(),
            position: driver.position.as_ref().map(|p| p.point),
            heading: driver.position.as_ref().map(|p| p.heading).unwrap_or_default(),
            vehicle_class: driver.vehicle.class,
            is_available: driver.is_available,
            is_active: driver.is_active,
            is_verified: driver.is_verified,
            current_ride_id: driver.current_ride_id.clone(),
            version: driver.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub distance_meters: f64,
}

#[derive(Default)]
struct IndexState {
    tree: RTree<IndexedPoint>,
    drivers: HashMap<String, IndexedDriver>,
}

impl IndexState {
    fn move_point(&mut self, driver_id: &str, from: Option<GeoPoint>, to: Option<GeoPoint>) {
        if let Some(old) = from {
            self.tree.remove(&IndexedPoint::new(&old, driver_id));
        }
        if let Some(new) = to {
            self.tree.insert(IndexedPoint::new(&new, driver_id));
        }
    }

    fn entry_mut(&mut self, driver_id: &str) -> RideResult<&mut IndexedDriver> {
        self.drivers
            .get_mut(driver_id)
            .ok_or_else(|| RideError::driver_not_found(driver_id))
    }
}

#[derive(Default)]
pub struct GeoIndex {
    state: RwLock<IndexState>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces everything the index knows about one driver.
    ///
    /// A snapshot older than the one already held is dropped, so snapshots
    /// that arrive out of commit order never roll a driver back. Returns
    /// whether the snapshot was applied.
    pub async fn register(&self, snapshot: IndexedDriver) -> bool {
        let mut state = self.state.write().await;
        let previous = match state.drivers.get(&snapshot.driver_id) {
            Some(existing) if existing.version > snapshot.version => {
                tracing::debug!(
                    "Ignoring stale snapshot of driver {} (v{} < v{})",
                    snapshot.driver_id,
                    snapshot.version,
                    existing.version
                );
                return false;
            }
            Some(existing) => existing.position,
            None => None,
        };
        state.move_point(&snapshot.driver_id, previous, snapshot.position);
        tracing::debug!("Indexed driver {} at v{}", snapshot.driver_id, snapshot.version);
        state.drivers.insert(snapshot.driver_id.clone(), snapshot);
        true
    }

    /// Moves a driver. Availability and the held version are left untouched;
    /// callers mirroring store commits use `register` instead.
    pub async fn upsert_position(
        &self,
        driver_id: &str,
        point: GeoPoint,
        heading: f64,
    ) -> RideResult<()> {
        point.validate()?;
        let mut state = self.state.write().await;
        let entry = state.entry_mut(driver_id)?;
        let previous = entry.position.replace(point);
        entry.heading = heading;
        state.move_point(driver_id, previous, Some(point));
        Ok(())
    }

    /// Flips eligibility in place, keeping the held version.
    pub async fn set_available(&self, driver_id: &str, available: bool) -> RideResult<()> {
        let mut state = self.state.write().await;
        state.entry_mut(driver_id)?.is_available = available;
        Ok(())
    }

    pub async fn get(&self, driver_id: &str) -> Option<IndexedDriver> {
        self.state.read().await.drivers.get(driver_id).cloned()
    }

    pub async fn driver_count(&self) -> usize {
        self.state.read().await.drivers.len()
    }

    /// Eligible drivers within `max_distance_meters` of `point`, nearest first,
    /// at most `limit` of them.
    pub async fn query(
        &self,
        point: &GeoPoint,
        class: VehicleClass,
        max_distance_meters: f64,
        limit: usize,
    ) -> RideResult<Vec<NearbyDriver>> {
        point.validate()?;
        if !max_distance_meters.is_finite() || max_distance_meters < 0.0 {
            return Err(RideError::invalid_input(format!(
                "search radius must be a non-negative number of meters, got {}",
                max_distance_meters
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let origin = to_cartesian(point);
        let mut found = Vec::with_capacity(limit);

        for candidate in state.tree.nearest_neighbor_iter(&origin) {
            let Some(driver) = state.drivers.get(&candidate.driver_id) else {
                continue;
            };
            let Some(position) = driver.position else {
                continue;
            };

            let distance_meters = point.distance_meters(&position);
            if distance_meters > max_distance_meters {
                break;
            }
            if !driver.is_eligible_for(class) {
                continue;
            }

            found.push(NearbyDriver {
                driver_id: driver.driver_id.clone(),
                distance_meters,
            });
            if found.len() == limit {
                break;
            }
        }

        // Chord and arc order agree; this only settles float ties.
        found.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        Ok(found)
    }
}
