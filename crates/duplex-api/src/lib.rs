pub mod auth;
pub mod chats;
pub mod folders;
pub mod messages;
pub mod middleware;
pub mod profile;
pub mod users;

use tracing::error;

use duplex_store::StoreError;

/// Store failures surface as 500s; the caller may retry the whole request.
pub(crate) fn internal(e: StoreError) -> axum::http::StatusCode {
    error!("store failure: {e}");
    axum::http::StatusCode::INTERNAL_SERVER_ERROR
}
