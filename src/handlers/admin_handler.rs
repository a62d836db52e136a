// src/handlers/admin_handler.rs
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::{JsonBody, SharedState};
use crate::{
    errors::RideResult,
    models::{
        actor::{Actor, Role},
        driver::{Driver, DriverRegistration, DriverVerification},
        rider::{Rider, RiderRegistration},
    },
    services::dispatch::AccountOperations,
};

pub async fn create_rider(
    State(state): State<SharedState>,
    actor: Actor,
    JsonBody(registration): JsonBody<RiderRegistration>,
) -> RideResult<(StatusCode, Json<Rider>)> {
    actor.require(Role::Admin)?;
    let rider = state.dispatch.register_rider(registration).await?;
    Ok((StatusCode::CREATED, Json(rider)))
}

pub async fn create_driver(
    State(state): State<SharedState>,
    actor: Actor,
    JsonBody(registration): JsonBody<DriverRegistration>,
) -> RideResult<(StatusCode, Json<Driver>)> {
    actor.require(Role::Admin)?;
    let driver = state.dispatch.register_driver(registration).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn get_driver(
    State(state): State<SharedState>,
    actor: Actor,
    Path(driver_id): Path<String>,
) -> RideResult<Json<Driver>> {
    actor.require(Role::Admin)?;
    Ok(Json(state.dispatch.driver_profile(&driver_id).await?))
}

pub async fn verify_driver(
    State(state): State<SharedState>,
    actor: Actor,
    Path(driver_id): Path<String>,
    JsonBody(verification): JsonBody<DriverVerification>,
) -> RideResult<Json<Driver>> {
    actor.require(Role::Admin)?;
    Ok(Json(state.dispatch.verify_driver(&driver_id, verification).await?))
}
