// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::actor::{Actor, Role};
use super::driver::{DriverPosition, VehicleClass};
use super::geo::{GeoPoint, Place};
use crate::utils::id_generator::{IdType, WithGeneratedId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RideStatus {
    Requested,  // Broadcast to nearby drivers, nobody committed yet
    Accepted,   // A driver won the offer and is heading to pickup
    Arrived,    // Driver waiting at pickup
    InProgress, // Rider on board
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::Arrived => "arrived",
            RideStatus::InProgress => "in-progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// A driver is attached and the trip has not finished.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RideStatus::Accepted | RideStatus::Arrived | RideStatus::InProgress
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an actor attempted when a lifecycle guard fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideAction {
    Accept,
    Advance(RideStatus),
    Cancel,
    Rate,
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideAction::Accept => f.write_str("accept"),
            RideAction::Advance(status) => write!(f, "move to {}", status),
            RideAction::Cancel => f.write_str("cancel"),
            RideAction::Rate => f.write_str("rate"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FareBreakdown {
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub distance_km: f64,
    pub total: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Wallet,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RideRating {
    pub rider_rating: Option<f64>,  // Given by the driver
    pub driver_rating: Option<f64>, // Given by the rider
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoutePoint {
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Rider,
    Driver,
    System,
}

impl From<Role> for CancelledBy {
    fn from(role: Role) -> Self {
        match role {
            Role::Rider => CancelledBy::Rider,
            Role::Driver => CancelledBy::Driver,
            Role::Admin => CancelledBy::System,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ride {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>, // Set exactly once, on acceptance
    pub pickup: Place,
    pub dropoff: Place,
    pub vehicle_class: VehicleClass,
    pub fare: FareBreakdown,
    pub payment: Payment,
    pub rating: RideRating,
    pub route: Vec<RoutePoint>,
    pub status: RideStatus,

    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,

    pub offered_to: Vec<String>, // Drivers that received the broadcast offer
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new(
        rider_id: impl Into<String>,
        pickup: Place,
        dropoff: Place,
        vehicle_class: VehicleClass,
        fare: FareBreakdown,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            rider_id: rider_id.into(),
            driver_id: None,
            pickup,
            dropoff,
            vehicle_class,
            fare,
            payment: Payment {
                method: payment_method,
                ..Payment::default()
            },
            rating: RideRating::default(),
            route: Vec::new(),
            status: RideStatus::Requested,
            requested_at: now,
            accepted_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            offered_to: Vec::new(),
            version: 0,
            updated_at: now,
        }
        .with_generated_id(IdType::Ride)
    }

    pub fn is_rider(&self, actor: &Actor) -> bool {
        actor.role == Role::Rider && self.rider_id == actor.id
    }

    pub fn is_assigned_driver(&self, actor: &Actor) -> bool {
        actor.role == Role::Driver && self.driver_id.as_deref() == Some(actor.id.as_str())
    }

    pub fn is_party(&self, actor: &Actor) -> bool {
        self.is_rider(actor) || self.is_assigned_driver(actor)
    }
}

impl WithGeneratedId for Ride {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize)]
pub struct RideRequest {
    pub pickup: Option<Place>,
    pub dropoff: Option<Place>,
    pub vehicle_class: Option<VehicleClass>,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RideRequestResponse {
    pub ride: Ride,
    pub candidate_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FareEstimateRequest {
    pub pickup: Option<Place>,
    pub dropoff: Option<Place>,
    pub vehicle_class: Option<VehicleClass>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RideStatusUpdate {
    pub status: RideStatus,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct RideCancellation {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RideRatingRequest {
    pub rating: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RideTracking {
    pub ride_id: String,
    pub status: RideStatus,
    pub driver_location: Option<DriverPosition>,
    pub pickup: Place,
    pub dropoff: Place,
}
