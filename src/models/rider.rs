// src/models/rider.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::GeoPoint;
use crate::utils::id_generator::{IdType, WithGeneratedId};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Rider {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub position: Option<GeoPoint>,
    pub rating: f64,
    pub rating_count: u32,
    pub total_rides: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RiderRegistration {
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RiderLocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Rider {
    pub fn new(registration: RiderRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: registration.name,
            phone: registration.phone,
            email: registration.email,
            position: None,
            rating: 5.0,
            rating_count: 0,
            total_rides: 0,
            created_at: now,
            updated_at: now,
        }
        .with_generated_id(IdType::Rider)
    }
}

impl WithGeneratedId for Rider {
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}
