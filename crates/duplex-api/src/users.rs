use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use duplex_types::api::{Claims, SearchResponse};

use crate::auth::AppState;
use crate::internal;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SearchResponse>, StatusCode> {
    if query.q.len() < 2 {
        return Ok(Json(SearchResponse { users: vec![] }));
    }

    let users = state
        .users
        .search(&query.q, &claims.sub)
        .await
        .map_err(internal)?;
    Ok(Json(SearchResponse { users }))
}
