// src/handlers/rider_handler.rs
use axum::{Json, extract::State};

use super::{JsonBody, SharedState};
use crate::{
    errors::RideResult,
    models::{actor::Actor, geo::GeoPoint, rider::RiderLocationUpdate},
    services::dispatch::DispatchOperations,
};

pub async fn update_location(
    State(state): State<SharedState>,
    actor: Actor,
    JsonBody(update): JsonBody<RiderLocationUpdate>,
) -> RideResult<Json<GeoPoint>> {
    Ok(Json(state.dispatch.update_rider_location(&actor, update).await?))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_rider_location() {
        let app = app();
        let rider_id = create_rider(&app).await;

        let (status, point) = call(
            &app,
            "PUT",
            "/riders/location",
            Some((rider_id.as_str(), "rider")),
            Some(json!({ "latitude": 5.6, "longitude": -0.18 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(point["latitude"], 5.6);

        let (status, body) = call(
            &app,
            "PUT",
            "/riders/location",
            Some(("usr-251018-nope1", "rider")),
            Some(json!({ "latitude": 5.6, "longitude": -0.18 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "rider_not_found");
    }
}
