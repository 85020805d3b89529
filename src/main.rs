use std::sync::Arc;

use anyhow::Context;
use liveroom::{
    app,
    auth::{Gateway, TokenVerifier},
    clock::RoomClock,
    config::Config,
    rooms::{RoomRegistry, RoomSettings},
    store::{MemoryStore, SessionStore, SqliteStore},
    AppState,
};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const COMMAND_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("liveroom=info")),
        )
        .init();

    info!("Loading config...");
    let config = Arc::new(Config::load());
    let clock = RoomClock::new();

    let store: Arc<dyn SessionStore> = if config.database_url == "memory" {
        warn!("DATABASE_URL=memory, rooms will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::connect(&config.database_url, config.max_connections)
                .await
                .with_context(|| format!("opening {}", config.database_url))?,
        )
    };

    let registry = RoomRegistry::new(
        store,
        clock,
        RoomSettings {
            delta_threshold: config.delta_threshold,
            command_capacity: COMMAND_CAPACITY,
        },
    );
    registry.restore().await.context("restoring active rooms")?;

    let gateway = Gateway::new(TokenVerifier::new(config.token_secret.as_bytes(), clock));
    let state = AppState {
        gateway,
        registry,
        config: Arc::clone(&config),
    };

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                warn!(%err, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!(%err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
