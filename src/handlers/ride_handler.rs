// src/handlers/ride_handler.rs
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::{JsonBody, SharedState};
use crate::{
    errors::RideResult,
    models::{
        actor::Actor,
        events::ChatMessage,
        ride::{
            ChatMessageRequest, FareBreakdown, FareEstimateRequest, Ride, RideCancellation,
            RideRatingRequest, RideRequest, RideRequestResponse, RideStatusUpdate, RideTracking,
        },
    },
    services::dispatch::DispatchOperations,
};

pub async fn request_ride(
    State(state): State<SharedState>,
    actor: Actor,
    JsonBody(request): JsonBody<RideRequest>,
) -> RideResult<(StatusCode, Json<RideRequestResponse>)> {
    let response = state.dispatch.request_ride(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn estimate_fare(
    State(state): State<SharedState>,
    JsonBody(request): JsonBody<FareEstimateRequest>,
) -> RideResult<Json<FareBreakdown>> {
    Ok(Json(state.dispatch.estimate_fare(request).await?))
}

pub async fn ride_history(
    State(state): State<SharedState>,
    actor: Actor,
) -> RideResult<Json<Vec<Ride>>> {
    Ok(Json(state.dispatch.ride_history(&actor).await?))
}

pub async fn get_ride(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<Ride>> {
    Ok(Json(state.dispatch.ride_details(&actor, &ride_id).await?))
}

pub async fn track_ride(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideTracking>> {
    Ok(Json(state.dispatch.track_ride(&actor, &ride_id).await?))
}

pub async fn accept_ride(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<Ride>> {
    Ok(Json(state.dispatch.accept_ride(&actor, &ride_id).await?))
}

pub async fn update_status(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
    JsonBody(update): JsonBody<RideStatusUpdate>,
) -> RideResult<Json<Ride>> {
    Ok(Json(
        state
            .dispatch
            .update_ride_status(&actor, &ride_id, update.status)
            .await?,
    ))
}

/// The body is optional; without one the default reason is recorded.
pub async fn cancel_ride(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
    body: Option<JsonBody<RideCancellation>>,
) -> RideResult<Json<Ride>> {
    let cancellation = body.map(|JsonBody(c)| c).unwrap_or_default();
    Ok(Json(
        state
            .dispatch
            .cancel_ride(&actor, &ride_id, cancellation.reason)
            .await?,
    ))
}

pub async fn rate_ride(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
    JsonBody(request): JsonBody<RideRatingRequest>,
) -> RideResult<Json<Ride>> {
    Ok(Json(
        state
            .dispatch
            .rate_ride(&actor, &ride_id, request.rating)
            .await?,
    ))
}

pub async fn send_message(
    State(state): State<SharedState>,
    actor: Actor,
    Path(ride_id): Path<String>,
    JsonBody(request): JsonBody<ChatMessageRequest>,
) -> RideResult<(StatusCode, Json<ChatMessage>)> {
    let message = state
        .dispatch
        .send_message(&actor, &ride_id, request.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
