use axum::extract::{Path, State};
use axum::Json;
use log::info;

use crate::error::ApiError;
use crate::models::PropertyListing;
use crate::AppState;

/// Fetches every indexed property with its active offers, newest listing first.
pub async fn get_properties(
    State(state): State<AppState>,
) -> Result<Json<Vec<PropertyListing>>, ApiError> {
    let store = state.properties.clone();
    let listings = tokio::task::spawn_blocking(move || store.list_properties()).await??;
    info!("Successfully fetched {} properties", listings.len());
    Ok(Json(listings))
}

/// Fetches a specific property by its on-chain id.
pub async fn get_property(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<PropertyListing>, ApiError> {
    let store = state.properties.clone();
    tokio::task::spawn_blocking(move || store.find_property(id))
        .await??
        .map(Json)
        .ok_or(ApiError::NotFound)
}
