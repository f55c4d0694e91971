use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use duplex_store::SoftDeleteOutcome;
use duplex_store::messages::new_message;
use duplex_types::ChatId;
use duplex_types::api::{
    Claims, DeleteMessageRequest, HistoryResponse, MarkReadRequest, SendMessageRequest,
    SendMessageResponse,
};
use duplex_types::events::DeliveryEvent;

use crate::auth::AppState;
use crate::internal;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.text.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let chat_id =
        ChatId::resolve(&claims.sub, &req.other_user).map_err(|_| StatusCode::BAD_REQUEST)?;

    // Chat is created lazily on first contact
    state
        .messages
        .get_or_create_chat(&chat_id)
        .await
        .map_err(internal)?;

    let message = new_message(chat_id, &claims.sub, &req.text);
    state.messages.append(&message).await.map_err(internal)?;

    state
        .dispatcher
        .publish(DeliveryEvent::Message {
            message: message.clone(),
        })
        .await;

    Ok((StatusCode::CREATED, Json(SendMessageResponse { message })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub other_user: String,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let chat_id =
        ChatId::resolve(&claims.sub, &query.other_user).map_err(|_| StatusCode::BAD_REQUEST)?;

    // Degrades to an empty log after retries rather than failing the view
    let messages = state.messages.list(&chat_id).await;
    Ok(Json(HistoryResponse { messages }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DeleteMessageRequest>,
) -> Result<StatusCode, StatusCode> {
    match state
        .messages
        .soft_delete(req.message_id, &claims.sub)
        .await
        .map_err(internal)?
    {
        SoftDeleteOutcome::Deleted(message) => {
            state
                .dispatcher
                .publish(DeliveryEvent::MessageDeleted {
                    id: message.id,
                    chat_id: message.chat_id,
                })
                .await;
            Ok(StatusCode::NO_CONTENT)
        }
        SoftDeleteOutcome::NotFound => Err(StatusCode::NOT_FOUND),
        SoftDeleteOutcome::NotAuthor => Err(StatusCode::FORBIDDEN),
    }
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<StatusCode, StatusCode> {
    let chat_id =
        ChatId::resolve(&claims.sub, &req.other_user).map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .unread
        .reset(&claims.sub, &chat_id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}
