use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use duplex_types::ChatId;
use duplex_types::api::{AssignChatRequest, Claims, CreateFolderRequest, FoldersResponse};

use crate::auth::AppState;
use crate::internal;

pub async fn list_folders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<FoldersResponse>, StatusCode> {
    let folders = state
        .folders
        .list_for_user(&claims.sub)
        .await
        .map_err(internal)?;
    Ok(Json(FoldersResponse { folders }))
}

pub async fn create_folder(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let folder = state
        .folders
        .create(&claims.sub, &req.name)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(folder)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFolderQuery {
    pub id: String,
}

pub async fn delete_folder(
    State(state): State<AppState>,
    Query(query): Query<DeleteFolderQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, StatusCode> {
    let folder = state
        .folders
        .get(&query.id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if folder.owner != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .folders
        .delete(&claims.sub, &query.id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AssignChatRequest>,
) -> Result<StatusCode, StatusCode> {
    let folder = state
        .folders
        .get(&req.folder_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if folder.owner != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .folders
        .assign(&claims.sub, &req.folder_id, &req.chat_id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn folder_chats(
    State(state): State<AppState>,
    Path(folder_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let folder = state
        .folders
        .get(&folder_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if folder.owner != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    let chats = state.folders.chats_in(&folder_id).await.map_err(internal)?;
    Ok(Json(chats))
}

#[derive(Debug, Deserialize)]
pub struct UnassignQuery {
    pub folder_id: String,
    pub chat_id: String,
}

pub async fn unassign_chat(
    State(state): State<AppState>,
    Query(query): Query<UnassignQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<StatusCode, StatusCode> {
    let chat_id = ChatId::from_stored(query.chat_id);
    state
        .folders
        .unassign(&query.folder_id, &chat_id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}
