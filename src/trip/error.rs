use thiserror::Error;

use super::types::TripStatus;

/// Typed failures from the trip lifecycle engine.
///
/// Every rejected transition surfaces as a distinct variant so the caller can
/// tell "already taken" from "not found" from "illegal right now".
#[derive(Debug, Error)]
pub enum TripError {
    #[error("Trip not found")]
    NotFound,

    #[error("Trip no longer available (accept race lost)")]
    Unavailable,

    #[error("Invalid transition from {status}")]
    InvalidTransition { status: TripStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TripError {
    /// Short machine-readable code for wire error payloads
    pub fn code(&self) -> &'static str {
        match self {
            TripError::NotFound => "TRIP_NOT_FOUND",
            TripError::Unavailable => "TRIP_UNAVAILABLE",
            TripError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TripError::Database(_) => "STORE_ERROR",
        }
    }
}
