// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::geo::GeoPoint;
use crate::utils::id_generator::{IdType, WithGeneratedId};

/// Vehicle classes a rider can book. Unknown names fall back to `Sedan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum VehicleClass {
    #[default]
    Sedan,
    Suv,
    Luxury,
    Van,
}

impl VehicleClass {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "suv" => VehicleClass::Suv,
            "luxury" => VehicleClass::Luxury,
            "van" => VehicleClass::Van,
            _ => VehicleClass::Sedan,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Sedan => "sedan",
            VehicleClass::Suv => "suv",
            VehicleClass::Luxury => "luxury",
            VehicleClass::Van => "van",
        }
    }
}

impl From<String> for VehicleClass {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub year: u16,
    pub color: String,
    pub license_plate: String,
    #[serde(default)]
    pub class: VehicleClass,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverPosition {
    pub point: GeoPoint,
    pub heading: f64, // Direction in degrees [0, 360)
    pub address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Earnings {
    pub total: f64,
    pub weekly: f64,
    pub daily: f64,
}

impl Earnings {
    pub fn credit(&mut self, amount: f64) {
        self.total += amount;
        self.weekly += amount;
        self.daily += amount;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub license_number: String,
    pub vehicle: Vehicle,
    pub position: Option<DriverPosition>,
    pub is_available: bool,
    pub current_ride_id: Option<String>, // Exclusive: at most one active ride
    pub is_active: bool,
    pub is_verified: bool,
    pub earnings: Earnings,
    pub rating: f64,       // Running average (0-5)
    pub rating_count: u32, // Ratings received so far
    pub total_rides: u32,  // Completed rides
    pub version: u64,      // Bumped by the store on every commit
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverRegistration {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub license_number: String,
    pub vehicle: Vehicle,
    pub initial_position: Option<GeoPoint>,
}

/// What a rider gets to see about the driver who took the ride.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverSummary {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub vehicle: Vehicle,
    pub location: Option<DriverPosition>,
    pub rating: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityUpdate {
    /// Omit to toggle the current value.
    pub is_available: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverLocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: f64,
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverVerification {
    pub is_verified: bool,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NearbyDriversQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub vehicle_class: Option<VehicleClass>,
    pub max_distance: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NearbyDriverView {
    pub driver: DriverSummary,
    pub distance_meters: f64,
}

impl Driver {
    pub fn new(registration: DriverRegistration) -> Self {
        let now = Utc::now();
        let position = registration.initial_position.map(|point| DriverPosition {
            point,
            heading: 0.0,
            address: None,
            updated_at: now,
        });

        let driver = Self {
            id: String::new(),
            name: registration.name,
            phone: registration.phone,
            email: registration.email,
            license_number: registration.license_number,
            vehicle: registration.vehicle,
            position,
            is_available: false,
            current_ride_id: None,
            is_active: true,
            is_verified: false,
            earnings: Earnings::default(),
            rating: 5.0,
            rating_count: 0,
            total_rides: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        driver.with_generated_id(IdType::Driver)
    }

    pub fn is_engaged(&self) -> bool {
        self.current_ride_id.is_some()
    }

    /// Engaged drivers are never available.
    pub fn is_consistent(&self) -> bool {
        !(self.is_engaged() && self.is_available)
    }

    pub fn lock_to(&mut self, ride_id: &str, now: DateTime<Utc>) {
        self.current_ride_id = Some(ride_id.to_string());
        self.is_available = false;
        self.updated_at = now;
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.current_ride_id = None;
        self.is_available = true;
        self.updated_at = now;
    }

    pub fn summary(&self) -> DriverSummary {
        DriverSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            vehicle: self.vehicle.clone(),
            location: self.position.clone(),
            rating: self.rating,
        }
    }
}

impl WithGeneratedId for Driver {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}
