// src/handlers/driver_handler.rs
use axum::{
    Json,
    extract::{Query, State},
};

use super::{JsonBody, SharedState};
use crate::{
    errors::RideResult,
    models::{
        actor::Actor,
        driver::{
            AvailabilityUpdate, Driver, DriverLocationUpdate, DriverPosition, Earnings,
            NearbyDriverView, NearbyDriversQuery,
        },
        ride::Ride,
    },
    services::dispatch::{AccountOperations, DispatchOperations},
};

pub async fn update_location(
    State(state): State<SharedState>,
    actor: Actor,
    JsonBody(update): JsonBody<DriverLocationUpdate>,
) -> RideResult<Json<DriverPosition>> {
    Ok(Json(state.dispatch.update_driver_location(&actor, update).await?))
}

/// Sets availability, or flips it when `is_available` is omitted.
pub async fn update_availability(
    State(state): State<SharedState>,
    actor: Actor,
    JsonBody(update): JsonBody<AvailabilityUpdate>,
) -> RideResult<Json<Driver>> {
    Ok(Json(
        state
            .dispatch
            .set_driver_availability(&actor, update.is_available)
            .await?,
    ))
}

pub async fn nearby_drivers(
    State(state): State<SharedState>,
    Query(query): Query<NearbyDriversQuery>,
) -> RideResult<Json<Vec<NearbyDriverView>>> {
    Ok(Json(state.dispatch.nearby_drivers(query).await?))
}

pub async fn current_ride(
    State(state): State<SharedState>,
    actor: Actor,
) -> RideResult<Json<Option<Ride>>> {
    Ok(Json(state.dispatch.current_ride(&actor).await?))
}

pub async fn earnings(
    State(state): State<SharedState>,
    actor: Actor,
) -> RideResult<Json<Earnings>> {
    Ok(Json(state.dispatch.driver_earnings(&actor).await?))
}
