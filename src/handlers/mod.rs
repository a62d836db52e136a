// src/handlers/mod.rs
use axum::{
    Json, Router, async_trait,
    extract::{FromRequest, FromRequestParts, Request, State, rejection::JsonRejection},
    http::request::Parts,
    routing::{get, post, put},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    errors::RideError,
    models::actor::{Actor, Role},
    state::AppState,
};

pub mod admin_handler;
pub mod driver_handler;
pub mod ride_handler;
pub mod rider_handler;
pub mod socket_handler;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rides/request", post(ride_handler::request_ride))
        .route("/rides/estimate-fare", post(ride_handler::estimate_fare))
        .route("/rides/history", get(ride_handler::ride_history))
        .route("/rides/:ride_id", get(ride_handler::get_ride))
        .route("/rides/:ride_id/track", get(ride_handler::track_ride))
        .route("/rides/:ride_id/accept", post(ride_handler::accept_ride))
        .route("/rides/:ride_id/status", put(ride_handler::update_status))
        .route("/rides/:ride_id/cancel", post(ride_handler::cancel_ride))
        .route("/rides/:ride_id/rate", post(ride_handler::rate_ride))
        .route("/rides/:ride_id/messages", post(ride_handler::send_message))
        .route("/drivers/location", put(driver_handler::update_location))
        .route("/drivers/availability", put(driver_handler::update_availability))
        .route("/drivers/nearby", get(driver_handler::nearby_drivers))
        .route("/drivers/current-ride", get(driver_handler::current_ride))
        .route("/drivers/earnings", get(driver_handler::earnings))
        .route("/riders/location", put(rider_handler::update_location))
        .route("/admin/riders", post(admin_handler::create_rider))
        .route("/admin/drivers", post(admin_handler::create_driver))
        .route("/admin/drivers/:driver_id", get(admin_handler::get_driver))
        .route("/admin/drivers/:driver_id/verify", put(admin_handler::verify_driver))
        .route("/ws", get(socket_handler::connect))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "indexed_drivers": state.geo_index.driver_count().await,
    }))
}

/// The caller, taken from the `x-actor-id` / `x-actor-role` headers set by
/// the gateway in front of this service.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = RideError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, ACTOR_ID_HEADER)?;
        let role: Role = header_value(parts, ACTOR_ROLE_HEADER)?.parse()?;
        Ok(Actor::new(id, role))
    }
}

fn header_value(parts: &Parts, name: &str) -> Result<String, RideError> {
    let value = parts
        .headers
        .get(name)
        .ok_or_else(|| RideError::MissingRequiredField(name.to_string()))?
        .to_str()
        .map_err(|_| RideError::invalid_input(format!("{} is not valid text", name)))?
        .trim();
    if value.is_empty() {
        return Err(RideError::MissingRequiredField(name.to_string()));
    }
    Ok(value.to_string())
}

/// `Json` whose rejections come back in the service's error format.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = RideError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| RideError::invalid_input(rejection.body_text()))?;
        Ok(Self(value))
    }
}
