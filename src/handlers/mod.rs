//! State mutation handlers for tree, kv and set families
//!
//! Each handler works on the edit version of one (team, app, state type) and
//! reaches persistence only through [`StateStore`].

mod kv;
mod set;
mod tree;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{StateFamily, StateType};
use crate::protocol::{ErrorCode, Signal};
use crate::store::StateStore;

/// Where a state signal applies
pub struct StateContext<'a> {
    pub store: &'a dyn StateStore,
    pub team_id: i64,
    pub app_id: i64,
    pub state_type: StateType,
}

/// Apply one state mutation signal at the edit version
pub async fn apply(ctx: &StateContext<'_>, signal: Signal, payload: &[Value]) -> Result<()> {
    use StateFamily::*;

    match (ctx.state_type.family(), signal) {
        (Tree, Signal::CreateState) => tree::create(ctx, payload).await,
        (Tree, Signal::CreateOrUpdateState) => tree::upsert(ctx, payload).await,
        (Tree, Signal::UpdateState) => tree::update(ctx, payload).await,
        (Tree, Signal::DeleteState) => tree::delete(ctx, payload).await,
        (Tree, Signal::MoveState) => tree::move_nodes(ctx, payload).await,
        (Tree, Signal::PutState) => Err(AppError::BadRequest(
            "Tree states cannot be replaced wholesale".to_string(),
        )),

        (Kv, Signal::CreateState) => kv::create(ctx, payload).await,
        (Kv, Signal::CreateOrUpdateState) => kv::upsert(ctx, payload).await,
        (Kv, Signal::UpdateState) => kv::update(ctx, payload).await,
        (Kv, Signal::DeleteState) => kv::delete(ctx, payload).await,
        (Kv, Signal::PutState) if ctx.state_type == StateType::Dependencies => {
            kv::put(ctx, payload).await
        }
        (Kv, Signal::MoveState) => Err(AppError::BadRequest(
            "Kv states cannot be moved".to_string(),
        )),

        (Set, Signal::CreateState) => set::create(ctx, payload).await,
        (Set, Signal::CreateOrUpdateState) => set::upsert(ctx, payload).await,
        (Set, Signal::UpdateState) => set::update(ctx, payload).await,
        (Set, Signal::DeleteState) => set::delete(ctx, payload).await,
        (Set, Signal::MoveState) => Err(AppError::BadRequest(
            "Set states cannot be moved".to_string(),
        )),

        (_, Signal::PutState) => Err(AppError::BadRequest(format!(
            "Only dependencies can be replaced wholesale, not {}",
            ctx.state_type.as_str()
        ))),

        (_, other) => Err(AppError::BadRequest(format!(
            "Signal {} does not mutate state",
            other.as_str()
        ))),
    }
}

/// Feedback code for a failed mutation of `family`
pub fn failure_code(signal: Signal, family: StateFamily) -> ErrorCode {
    match (signal, family) {
        (Signal::MoveState, StateFamily::Kv) => ErrorCode::CanNotMoveKvState,
        (Signal::MoveState, StateFamily::Set) => ErrorCode::CanNotMoveSetState,
        _ => signal.failure_code(),
    }
}

/// Name of the first entity a payload touches, for modify history
pub fn target_name(payload: &[Value]) -> String {
    let Some(first) = payload.first() else {
        return String::new();
    };
    match first {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(name) = map.get("displayName").and_then(Value::as_str) {
                return name.to_string();
            }
            if let Some(after) = map.get("after") {
                return target_name(std::slice::from_ref(after));
            }
            map.keys().next().cloned().unwrap_or_default()
        }
        _ => String::new(),
    }
}

pub(crate) fn as_strings(payload: &[Value], what: &str) -> Result<Vec<String>> {
    payload
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| AppError::BadRequest(format!("{} must be a string", what)))
        })
        .collect()
}
