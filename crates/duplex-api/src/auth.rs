use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};

use duplex_delivery::Dispatcher;
use duplex_store::{FolderIndex, KvStore, MessageStore, UnreadCounter, UserStore};
use duplex_types::api::{
    Claims, LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse,
};
use duplex_types::chat_id::is_valid_username;
use duplex_types::models::User;

use crate::internal;

pub type AppState = Arc<AppStateInner>;

/// Shared handler state: stateless repository views over one store, plus
/// the in-process delivery dispatcher.
pub struct AppStateInner {
    pub users: UserStore,
    pub messages: MessageStore,
    pub unread: UnreadCounter,
    pub folders: FolderIndex,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(store: Arc<dyn KvStore>, jwt_secret: String) -> Self {
        Self {
            users: UserStore::new(store.clone()),
            messages: MessageStore::new(store.clone()),
            unread: UnreadCounter::new(store.clone()),
            folders: FolderIndex::new(store),
            dispatcher: Dispatcher::new(),
            jwt_secret,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_username(&req.username) {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 6 {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state.users.get(&req.username).await.map_err(internal)?.is_some() {
        return Err(StatusCode::CONFLICT);
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let user = User {
        username: req.username.clone(),
        password: password_hash,
        created_at: Utc::now(),
        display_name: None,
        bio: None,
        photo_url: None,
        emoji: None,
    };
    state.users.create(&user).await.map_err(internal)?;

    let token = create_token(&state.jwt_secret, &req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            username: req.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .users
        .get(&req.username)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token = create_token(&state.jwt_secret, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        username: user.username,
        token,
    }))
}

pub async fn me(Extension(claims): Extension<Claims>) -> Json<MeResponse> {
    Json(MeResponse {
        username: claims.sub,
    })
}

/// Tokens are client-held; logout is an acknowledgment, nothing to revoke.
pub async fn logout(Extension(_claims): Extension<Claims>) -> StatusCode {
    StatusCode::NO_CONTENT
}

fn create_token(secret: &str, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: username.to_string(),
        exp: (Utc::now() + chrono::Duration::days(7)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::verify_token;

    #[test]
    fn password_hash_verifies_and_rejects() {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(b"hunter22", &salt)
            .unwrap()
            .to_string();
        let parsed = PasswordHash::new(&hash).unwrap();

        assert!(Argon2::default().verify_password(b"hunter22", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }

    #[test]
    fn token_round_trip() {
        let token = create_token("secret", "alice").unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "alice");

        assert!(verify_token(&token, "other-secret").is_none());
        assert!(verify_token("not-a-token", "secret").is_none());
    }
}
