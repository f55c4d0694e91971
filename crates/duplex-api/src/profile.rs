use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use duplex_store::users::ProfileUpdate;
use duplex_types::api::{Claims, ProfileResponse, UpdateProfileRequest};

use crate::auth::AppState;
use crate::internal;

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    /// Defaults to the caller's own profile.
    pub username: Option<String>,
}

pub async fn get_profile(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProfileResponse>, StatusCode> {
    let target = query.username.unwrap_or(claims.sub);

    let user = state
        .users
        .get(&target)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    // ProfileResponse strips the password hash
    Ok(Json(user.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, StatusCode> {
    let update = ProfileUpdate {
        display_name: req.display_name,
        bio: req.bio,
        photo_url: req.photo_url,
        emoji: req.emoji,
    };

    let user = state
        .users
        .update_profile(&claims.sub, update)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(user.into()))
}
