use std::time::Duration;

use tracing::{debug, info, warn};

use duplex_api::auth::AppState;
use duplex_store::StoreError;

/// Periodically recomputes unread counters from the message logs. Repairs
/// counters that drifted when an increment was lost after a successful
/// append.
pub async fn run_reconcile_loop(state: AppState, every: Duration) {
    info!(interval_secs = every.as_secs(), "unread reconciler started");
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        match reconcile_all(&state).await {
            Ok(pairs) => debug!(pairs, "unread reconcile pass complete"),
            Err(err) => warn!(%err, "unread reconcile pass failed"),
        }
    }
}

async fn reconcile_all(state: &AppState) -> Result<usize, StoreError> {
    let mut pairs = 0;
    for username in state.users.all_usernames().await? {
        for chat in state.messages.chats_for_user(&username).await? {
            let log = state.messages.list(&chat.id).await;
            state.unread.reconcile(&username, &chat.id, &log).await?;
            pairs += 1;
        }
    }
    Ok(pairs)
}
