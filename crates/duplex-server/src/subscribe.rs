use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::warn;

use duplex_api::auth::AppState;
use duplex_api::middleware::verify_token;
use duplex_delivery::SubscriptionConfig;
use duplex_types::ChatId;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    /// JWT in the query string; EventSource cannot set headers.
    pub token: String,
    pub other_user: String,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let claims =
        verify_token(&query.token, &state.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?;
    let chat_id =
        ChatId::resolve(&claims.sub, &query.other_user).map_err(|_| StatusCode::BAD_REQUEST)?;

    let events = duplex_delivery::subscribe(
        state.messages.clone(),
        state.dispatcher.clone(),
        chat_id,
        claims.sub,
        SubscriptionConfig::default(),
    );

    let sse_events = events.map(|event| {
        let name = event.event_name();
        Ok(match Event::default().event(name).json_data(&event) {
            Ok(ev) => ev,
            Err(err) => {
                warn!(%err, "failed to encode delivery event");
                Event::default().comment("encode error")
            }
        })
    });

    Ok(Sse::new(sse_events).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}
