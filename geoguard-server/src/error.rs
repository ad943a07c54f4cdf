use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geoguard_core::GeofenceError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failures of the external stores: containment oracle, geometry source and
/// alert log storage
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store query timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    NotFound(#[from] GeofenceError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(e) if e.is_not_found())
    }
}

/// Errors reported to HTTP callers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(#[from] StoreError),
}

impl From<GeofenceError> for ApiError {
    fn from(e: GeofenceError) -> Self {
        match e {
            GeofenceError::InvalidInput(reason) => ApiError::InvalidInput(reason),
            other => ApiError::NotFound(other.to_string()),
        }
    }
}

impl ApiError {
    /// Store errors that are really lookups of unknown things become 404
    pub fn from_store(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(inner) => inner.into(),
            other => ApiError::Unavailable(other),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

// Tell axum how to convert `ApiError` into a response.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoguard_core::VesselId;

    #[test]
    fn test_status_mapping() {
        let e: ApiError = GeofenceError::InvalidInput("zoneIds must be an array".into()).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);

        let e = ApiError::from_store(StoreError::NotFound(GeofenceError::VesselNotFound(
            VesselId::from("V1"),
        )));
        assert_eq!(e.status(), StatusCode::NOT_FOUND);

        let e = ApiError::from_store(StoreError::Timeout(Duration::from_secs(1)));
        assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
