use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ride::{RideAction, RideStatus};

/// Main error type for the ride dispatch service
#[derive(Debug, Error)]
pub enum RideError {
    // Input validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Validation failed: {} errors", .0.len())]
    ValidationFailed(Vec<ValidationError>),
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    // Lookups
    #[error("Ride not found: {0}")]
    RideNotFound(String),
    #[error("Driver not found: {0}")]
    DriverNotFound(String),
    #[error("Rider not found: {0}")]
    RiderNotFound(String),

    // Authorization and lifecycle
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("{}", transition_message(.from, .action))]
    InvalidTransition { from: RideStatus, action: RideAction },
    #[error("Conflict: {0}")]
    Conflict(String),

    // Infrastructure
    #[error("Store error: {0}")]
    Store(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

fn transition_message(from: &RideStatus, action: &RideAction) -> String {
    match action {
        RideAction::Accept => format!("Ride is no longer available (status: {})", from),
        _ => format!("Cannot {} a ride that is {}", action, from),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

pub type RideResult<T> = Result<T, RideError>;

impl RideError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        RideError::InvalidInput(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        RideError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        RideError::Conflict(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        RideError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        RideError::RideNotFound(ride_id.into())
    }

    pub fn driver_not_found(driver_id: impl Into<String>) -> Self {
        RideError::DriverNotFound(driver_id.into())
    }

    pub fn rider_not_found(rider_id: impl Into<String>) -> Self {
        RideError::RiderNotFound(rider_id.into())
    }

    /// True when a driver tried to accept a ride somebody else already took.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            RideError::InvalidTransition { from, action: RideAction::Accept } if *from != RideStatus::Requested
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RideError::InvalidInput(_)
            | RideError::ValidationFailed(_)
            | RideError::MissingRequiredField(_) => StatusCode::BAD_REQUEST,
            RideError::RideNotFound(_)
            | RideError::DriverNotFound(_)
            | RideError::RiderNotFound(_) => StatusCode::NOT_FOUND,
            RideError::Forbidden(_) => StatusCode::FORBIDDEN,
            RideError::InvalidTransition { .. } | RideError::Conflict(_) => StatusCode::CONFLICT,
            RideError::Store(_) | RideError::Config(_) | RideError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RideError::InvalidInput(_) => "invalid_input",
            RideError::ValidationFailed(_) => "validation_failed",
            RideError::MissingRequiredField(_) => "missing_field",
            RideError::RideNotFound(_) => "ride_not_found",
            RideError::DriverNotFound(_) => "driver_not_found",
            RideError::RiderNotFound(_) => "rider_not_found",
            RideError::Forbidden(_) => "forbidden",
            RideError::InvalidTransition { .. } if self.is_lost_race() => "ride_unavailable",
            RideError::InvalidTransition { .. } => "invalid_transition",
            RideError::Conflict(_) => "conflict",
            RideError::Store(_) | RideError::Config(_) | RideError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for RideError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = self.error_code().to_string();

        let (message, details) = match &self {
            RideError::ValidationFailed(errors) => (
                "Validation errors occurred".to_string(),
                serde_json::to_value(errors).ok(),
            ),
            // Infrastructure details stay in the logs
            RideError::Store(_) | RideError::Config(_) | RideError::Internal(_) => {
                tracing::error!("Request failed: {}", self);
                ("Internal server error".to_string(), None)
            }
            _ => (self.to_string(), None),
        };

        (status, axum::Json(ErrorResponse { error, message, details })).into_response()
    }
}

impl From<serde_json::Error> for RideError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            RideError::InvalidInput(err.to_string())
        } else {
            RideError::Internal(err.to_string())
        }
    }
}
