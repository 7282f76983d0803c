use std::collections::HashSet;

use serde_json::Value;

use super::StateContext;
use crate::error::{AppError, Result};
use crate::models::{KvState, EDIT_VERSION};

/// Flatten `[{key: value, ...}, ...]` into pairs
fn entries(payload: &[Value]) -> Result<Vec<(String, Value)>> {
    let mut pairs = Vec::new();
    for item in payload {
        let map = item
            .as_object()
            .ok_or_else(|| AppError::BadRequest("Kv entries must be objects".to_string()))?;
        pairs.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(pairs)
}

async fn find(ctx: &StateContext<'_>, key: &str) -> Result<Option<KvState>> {
    ctx.store
        .find_kv_state_by_key(ctx.team_id, ctx.app_id, ctx.state_type, EDIT_VERSION, key)
        .await
}

async fn insert(ctx: &StateContext<'_>, key: String, value: Value) -> Result<()> {
    let state = KvState::new(
        ctx.state_type,
        ctx.team_id,
        ctx.app_id,
        EDIT_VERSION,
        key,
        value,
    );
    ctx.store.create_kv_state(state).await?;
    Ok(())
}

pub(super) async fn create(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for (key, value) in entries(payload)? {
        if find(ctx, &key).await?.is_some() {
            return Err(AppError::Conflict(format!("Key {} already exists", key)));
        }
        insert(ctx, key, value).await?;
    }
    Ok(())
}

pub(super) async fn update(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for (key, value) in entries(payload)? {
        let mut state = find(ctx, &key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Key {} not found", key)))?;
        state.value = value;
        ctx.store.update_kv_state(&state).await?;
    }
    Ok(())
}

pub(super) async fn upsert(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for (key, value) in entries(payload)? {
        match find(ctx, &key).await? {
            Some(mut state) => {
                state.value = value;
                ctx.store.update_kv_state(&state).await?;
            }
            None => insert(ctx, key, value).await?,
        }
    }
    Ok(())
}

pub(super) async fn delete(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for key in super::as_strings(payload, "Key")? {
        let state = find(ctx, &key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Key {} not found", key)))?;
        ctx.store
            .delete_kv_state(ctx.team_id, ctx.app_id, state.id)
            .await?;
    }
    Ok(())
}

/// Replace every record of the state type with the payload.
///
/// The payload is validated in full before anything is deleted.
pub(super) async fn put(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    let replacement = entries(payload)?;
    let mut seen = HashSet::with_capacity(replacement.len());
    if let Some((key, _)) = replacement.iter().find(|(key, _)| !seen.insert(key.as_str())) {
        return Err(AppError::BadRequest(format!("Key {} is repeated", key)));
    }
    let current = ctx
        .store
        .list_kv_states(ctx.team_id, ctx.app_id, Some(ctx.state_type), EDIT_VERSION)
        .await?;
    for state in current {
        ctx.store
            .delete_kv_state(ctx.team_id, ctx.app_id, state.id)
            .await?;
    }
    for (key, value) in replacement {
        insert(ctx, key, value).await?;
    }
    Ok(())
}
