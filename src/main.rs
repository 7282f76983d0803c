//! Roomhub server binary

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomhub::auth::SupervisorClient;
use roomhub::config::Config;
use roomhub::store::SqliteStore;
use roomhub::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    // Connects and runs migrations
    let store = SqliteStore::connect(&config.database_url, config.max_connections).await?;
    let validator = SupervisorClient::new(&config.supervisor_url, &config.secret_key);
    let state = AppState::new(Arc::new(store), Arc::new(validator), config.hub_config());

    let app = roomhub::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
