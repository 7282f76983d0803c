//! Websocket upgrade endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::error::Result;
use crate::ids::decode_id;
use crate::models::{UserInfo, DASHBOARD_APP_ID};
use crate::session::{self, SessionKind};
use crate::AppState;

/// Upper bound on a single websocket message or frame
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

/// Dashboard presence room of a team
pub async fn dashboard_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
) -> Result<Response> {
    let team_id = decode_id(&team_id)?;
    Ok(upgrade(ws, state, SessionKind::Text, team_id, DASHBOARD_APP_ID, None))
}

/// Text frames for an application room
pub async fn app_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
) -> Result<Response> {
    let team_id = decode_id(&team_id)?;
    let app_id = decode_id(&app_id)?;
    Ok(upgrade(ws, state, SessionKind::Text, team_id, app_id, None))
}

/// Binary frames for an application room; authenticated before the upgrade
pub async fn binary_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
) -> Result<Response> {
    let team_id = decode_id(&team_id)?;
    let app_id = decode_id(&app_id)?;
    let user = state.validator.authenticate(&query.token).await?;
    tracing::debug!(user_id = user.id, team_id, app_id, "Binary session authenticated");
    Ok(upgrade(ws, state, SessionKind::Binary, team_id, app_id, Some(user)))
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    kind: SessionKind,
    team_id: i64,
    app_id: i64,
    user: Option<UserInfo>,
) -> Response {
    let hub = state.hub.clone();
    let config = state.config.clone();
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| session::serve(socket, hub, config, kind, team_id, app_id, user))
        .into_response()
}
