//! HTTP control endpoints for snapshots and releases
//!
//! Anything that mutates persisted state is forwarded to the hub dispatcher
//! so it is ordered with the websocket traffic of the same room.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::ids::{decode_id, encode_id};
use crate::models::{
    App, AppSnapshot, ModifyHistory, RecoverSnapshotRequest, TriggerMode, UserInfo,
    VersionContents, EDIT_VERSION,
};
use crate::store::load_version;
use crate::AppState;

/// Snapshot as presented over HTTP, with an encoded id
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    #[serde(rename = "snapshotID")]
    pub snapshot_id: String,
    pub target_version: i64,
    pub trigger_mode: TriggerMode,
    pub modify_history: Vec<ModifyHistory>,
    pub created_at: DateTime<Utc>,
}

impl From<AppSnapshot> for SnapshotView {
    fn from(snapshot: AppSnapshot) -> Self {
        Self {
            snapshot_id: encode_id(snapshot.id),
            target_version: snapshot.target_version,
            trigger_mode: snapshot.trigger_mode,
            modify_history: snapshot.modify_history,
            created_at: snapshot.created_at,
        }
    }
}

fn room_ids(team_id: &str, app_id: &str) -> Result<(i64, i64)> {
    Ok((decode_id(team_id)?, decode_id(app_id)?))
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<UserInfo> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    state.validator.authenticate(token).await
}

pub async fn recover_snapshot(
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<RecoverSnapshotRequest>,
) -> Result<Json<SnapshotView>> {
    let (team_id, app_id) = room_ids(&team_id, &app_id)?;
    let user = authorize(&state, &headers).await?;
    let snapshot_id = decode_id(&request.snapshot_id)?;

    let recovered = state
        .hub
        .recover_snapshot(team_id, app_id, snapshot_id, user.id)
        .await?;
    // The dispatcher has already told the room to reload
    Ok(Json(recovered.into()))
}

pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Vec<SnapshotView>>> {
    let (team_id, app_id) = room_ids(&team_id, &app_id)?;
    authorize(&state, &headers).await?;
    let snapshots = state.store.list_snapshots(team_id, app_id).await?;
    Ok(Json(snapshots.into_iter().map(SnapshotView::from).collect()))
}

pub async fn take_snapshot(
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<SnapshotView>> {
    let (team_id, app_id) = room_ids(&team_id, &app_id)?;
    authorize(&state, &headers).await?;
    let archived = state.hub.take_snapshot(team_id, app_id).await?;
    Ok(Json(archived.into()))
}

pub async fn deploy(
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<App>> {
    let (team_id, app_id) = room_ids(&team_id, &app_id)?;
    let user = authorize(&state, &headers).await?;
    let app = state.hub.deploy(team_id, app_id).await?;
    tracing::info!(team_id, app_id, user_id = user.id, "Deployed application");
    Ok(Json(app))
}

/// Released records, served to viewers without authentication
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path((team_id, app_id)): Path<(String, String)>,
) -> Result<Json<VersionContents>> {
    let (team_id, app_id) = room_ids(&team_id, &app_id)?;
    let app = state.store.get_app(team_id, app_id).await?;
    if app.release_version == EDIT_VERSION {
        return Err(AppError::NotFound(format!(
            "App {} has no release",
            encode_id(app_id)
        )));
    }
    let contents = load_version(state.store.as_ref(), team_id, app_id, app.release_version).await?;
    Ok(Json(contents))
}
