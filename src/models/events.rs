// src/models/events.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::actor::{Actor, Role};
use super::driver::{DriverSummary, VehicleClass};
use super::geo::{GeoPoint, Place};
use super::ride::{CancelledBy, RideStatus};

/// Id of the channel every connected rider listens on.
pub const ALL_RIDERS: &str = "*";

/// Push address of one connected rider or driver, or of all riders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub role: Role,
    pub id: String,
}

impl Channel {
    pub fn new(role: Role, id: impl Into<String>) -> Self {
        Self { role, id: id.into() }
    }

    pub fn rider(id: impl Into<String>) -> Self {
        Self::new(Role::Rider, id)
    }

    pub fn driver(id: impl Into<String>) -> Self {
        Self::new(Role::Driver, id)
    }

    /// Riders browsing for a car watch drivers move here.
    pub fn all_riders() -> Self {
        Self::new(Role::Rider, ALL_RIDERS)
    }
}

impl From<&Actor> for Channel {
    fn from(actor: &Actor) -> Self {
        Self::new(actor.role, actor.id.clone())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.role, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub ride_id: String,
    pub from: Actor,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RideEvent {
    NewRideOffer {
        ride_id: String,
        pickup: Place,
        dropoff: Place,
        vehicle_class: VehicleClass,
        fare: f64,
        distance_km: f64,
    },
    RideAccepted {
        ride_id: String,
        driver: DriverSummary,
    },
    RideStatusChanged {
        ride_id: String,
        status: RideStatus,
    },
    RideCancelled {
        ride_id: String,
        cancelled_by: CancelledBy,
        reason: Option<String>,
    },
    /// The offer went to someone else or the rider gave up.
    RideOfferWithdrawn {
        ride_id: String,
    },
    DriverLocationChanged {
        driver_id: String,
        ride_id: String,
        location: GeoPoint,
        heading: f64,
    },
    RiderLocationChanged {
        rider_id: String,
        ride_id: String,
        location: GeoPoint,
    },
    /// Any driver moved; sent to every connected rider.
    NearbyDriverUpdate {
        driver_id: String,
        location: GeoPoint,
        is_available: bool,
    },
    NewMessage(ChatMessage),
}

impl RideEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RideEvent::NewRideOffer { .. } => "new_ride_offer",
            RideEvent::RideAccepted { .. } => "ride_accepted",
            RideEvent::RideStatusChanged { .. } => "ride_status_changed",
            RideEvent::RideCancelled { .. } => "ride_cancelled",
            RideEvent::RideOfferWithdrawn { .. } => "ride_offer_withdrawn",
            RideEvent::DriverLocationChanged { .. } => "driver_location_changed",
            RideEvent::RiderLocationChanged { .. } => "rider_location_changed",
            RideEvent::NearbyDriverUpdate { .. } => "nearby_driver_update",
            RideEvent::NewMessage(_) => "new_message",
        }
    }
}
