use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duplex_api::auth::AppStateInner;
use duplex_api::middleware::jwt_secret;
use duplex_server::{build_router, reconcile};
use duplex_store::{KvStore, MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duplex=debug,tower_http=debug".into()),
        )
        .init();

    let host = std::env::var("DUPLEX_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("DUPLEX_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let reconcile_secs: u64 = std::env::var("DUPLEX_RECONCILE_SECS")
        .unwrap_or_else(|_| "300".into())
        .parse()?;

    let store: Arc<dyn KvStore> = match std::env::var("DUPLEX_REDIS_URL") {
        Ok(url) => {
            info!("connecting to redis");
            Arc::new(RedisStore::connect(&url).await?)
        }
        Err(_) => {
            warn!("DUPLEX_REDIS_URL not set, falling back to the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppStateInner::new(store, jwt_secret()));

    if reconcile_secs > 0 {
        tokio::spawn(reconcile::run_reconcile_loop(
            state.clone(),
            Duration::from_secs(reconcile_secs),
        ));
    } else {
        warn!("unread reconciler disabled (DUPLEX_RECONCILE_SECS=0)");
    }

    let app = build_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
