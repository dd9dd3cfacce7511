use axum::extract::{Query, State};
use axum::Json;
use log::info;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::models::{Profile, ProfileUpdate};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub address: Option<String>,
}

fn required_address(address: Option<String>) -> Result<String, ApiError> {
    address
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .ok_or(ApiError::MissingAddress)
}

/// `GET /profile?address=` - the stored profile, or `{}` when there is none.
pub async fn get_profile(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<Value>, ApiError> {
    let address = required_address(query.address)?;
    let store = state.profiles.clone();
    let found = tokio::task::spawn_blocking(move || store.find_profile(&address)).await??;
    Ok(Json(match found {
        Some(profile) => serde_json::to_value(profile)?,
        None => Value::Object(Default::default()),
    }))
}

/// `POST /profile` - upserts the profile keyed by lowercase address.
pub async fn upsert_profile(
    State(state): State<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    let profile = Profile {
        address: required_address(update.address)?,
        name: update.name,
        bio: update.bio,
        avatar_url: update.avatar_url,
        updated_at: chrono::Utc::now().timestamp_millis(),
    };
    info!("Upserting profile for {}", profile.address);
    let store = state.profiles.clone();
    let saved = tokio::task::spawn_blocking(move || store.upsert_profile(&profile)).await??;
    Ok(Json(saved))
}
