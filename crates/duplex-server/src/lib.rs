pub mod reconcile;
pub mod subscribe;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use duplex_api::auth::{self, AppState};
use duplex_api::middleware::require_auth;
use duplex_api::{chats, folders, messages, profile, users};

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/chats", get(chats::list_chats))
        .route("/history", get(messages::history))
        .route("/send", post(messages::send_message))
        .route("/delete", post(messages::delete_message))
        .route("/mark-read", post(messages::mark_read))
        .route("/users/search", get(users::search_users))
        .route(
            "/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route(
            "/folders",
            get(folders::list_folders)
                .post(folders::create_folder)
                .delete(folders::delete_folder),
        )
        .route(
            "/folders/assign",
            post(folders::assign_chat).delete(folders::unassign_chat),
        )
        .route("/folders/{folder_id}/chats", get(folders::folder_chats))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    // Authenticated via query token: EventSource cannot set headers
    let subscribe_route = Router::new()
        .route("/subscribe", get(subscribe::subscribe))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(subscribe_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
