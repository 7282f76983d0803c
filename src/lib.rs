//! Roomhub - real-time collaboration hub for a low-code application builder

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod ids;
pub mod models;
pub mod protocol;
pub mod room;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod tree;
pub mod websocket;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenValidator;
use crate::config::HubConfig;
use crate::hub::{Hub, HubHandle};
use crate::store::StateStore;

/// Application state shared across handlers
pub struct AppState {
    pub hub: HubHandle,
    pub store: Arc<dyn StateStore>,
    pub validator: Arc<dyn TokenValidator>,
    pub config: HubConfig,
}

impl AppState {
    /// Start the hub dispatcher and wrap everything the handlers need
    pub fn new(
        store: Arc<dyn StateStore>,
        validator: Arc<dyn TokenValidator>,
        config: HubConfig,
    ) -> Arc<Self> {
        let hub = Hub::spawn(store.clone(), validator.clone(), &config);
        Arc::new(Self {
            hub,
            store,
            validator,
            config,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/teams/:team_id/room/websocketConnection/dashboard",
            get(websocket::dashboard_handler),
        )
        .route(
            "/teams/:team_id/room/websocketConnection/apps/:app_id",
            get(websocket::app_handler),
        )
        .route(
            "/teams/:team_id/room/binaryWebsocketConnection/apps/:app_id",
            get(websocket::binary_handler),
        )
        .route(
            "/api/v1/teams/:team_id/apps/:app_id/recoverSnapshot",
            post(api::recover_snapshot),
        )
        .route(
            "/api/v1/teams/:team_id/apps/:app_id/snapshots",
            get(api::list_snapshots).post(api::take_snapshot),
        )
        .route("/api/v1/teams/:team_id/apps/:app_id/deploy", post(api::deploy))
        .route("/api/v1/teams/:team_id/apps/:app_id/release", get(api::release))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
