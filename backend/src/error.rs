use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Address required")]
    MissingAddress,
    #[error("Property not found")]
    NotFound,
    #[error("Database error")]
    Store(#[from] StoreError),
    #[error("Internal server error")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingAddress => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Store(e) => {
                log::error!("storage failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Encode(e) => {
                log::error!("failed to encode response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Store(StoreError::Join(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_failures_are_not_reported_as_storage() {
        let encode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let response = ApiError::from(encode).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::from(serde_json::from_str::<u8>("x").unwrap_err()).to_string(),
            "Internal server error"
        );
        assert_eq!(
            ApiError::Store(StoreError::Invalid("down".into())).to_string(),
            "Database error"
        );
    }
}
