use axum::{Extension, Json, extract::State, http::StatusCode};

use duplex_types::api::{ChatListEntry, ChatsResponse, Claims};

use crate::auth::AppState;
use crate::internal;

/// Chat list for the caller, newest activity first, enriched with the
/// peer's username and the caller's unread count per chat.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ChatsResponse>, StatusCode> {
    let username = &claims.sub;

    let chats = state.messages.chats_for_user(username).await.map_err(internal)?;
    let unread = state.unread.get_all(username).await.map_err(internal)?;

    let mut entries: Vec<ChatListEntry> = chats
        .into_iter()
        .filter_map(|chat| {
            let other_user = chat.id.other_participant(username)?.to_string();
            let unread_count = unread.get(chat.id.as_str()).copied().unwrap_or(0);
            Some(ChatListEntry {
                id: chat.id,
                participants: chat.participants,
                created_at: chat.created_at,
                last_message: chat.last_message,
                other_user,
                unread_count,
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        let activity = |e: &ChatListEntry| {
            e.last_message
                .as_ref()
                .map(|m| m.timestamp)
                .unwrap_or(e.created_at)
        };
        activity(b).cmp(&activity(a))
    });

    Ok(Json(ChatsResponse { chats: entries }))
}
