use serde::Deserialize;
use serde_json::Value;

use super::StateContext;
use crate::error::{AppError, Result};
use crate::models::{SetState, EDIT_VERSION};

#[derive(Debug, Deserialize)]
struct Rename {
    before: String,
    after: String,
}

async fn find(ctx: &StateContext<'_>, value: &str) -> Result<Option<SetState>> {
    ctx.store
        .find_set_state_by_value(ctx.team_id, ctx.app_id, ctx.state_type, EDIT_VERSION, value)
        .await
}

async fn insert(ctx: &StateContext<'_>, value: &str) -> Result<()> {
    let state = SetState::new(ctx.state_type, ctx.team_id, ctx.app_id, EDIT_VERSION, value);
    ctx.store.create_set_state(state).await?;
    Ok(())
}

async fn rename(ctx: &StateContext<'_>, rename: Rename, create_missing: bool) -> Result<()> {
    match find(ctx, &rename.before).await? {
        Some(mut state) => {
            state.value = rename.after;
            ctx.store.update_set_state(&state).await
        }
        None if create_missing => {
            if find(ctx, &rename.after).await?.is_none() {
                insert(ctx, &rename.after).await?;
            }
            Ok(())
        }
        None => Err(AppError::NotFound(format!("{} not found", rename.before))),
    }
}

pub(super) async fn create(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for value in super::as_strings(payload, "Set member")? {
        if find(ctx, &value).await?.is_some() {
            return Err(AppError::Conflict(format!("{} already exists", value)));
        }
        insert(ctx, &value).await?;
    }
    Ok(())
}

pub(super) async fn update(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for item in payload {
        let request: Rename = serde_json::from_value(item.clone())?;
        rename(ctx, request, false).await?;
    }
    Ok(())
}

pub(super) async fn upsert(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for item in payload {
        match item {
            Value::String(value) => {
                if find(ctx, value).await?.is_none() {
                    insert(ctx, value).await?;
                }
            }
            other => {
                let request: Rename = serde_json::from_value(other.clone())?;
                rename(ctx, request, true).await?;
            }
        }
    }
    Ok(())
}

pub(super) async fn delete(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for value in super::as_strings(payload, "Set member")? {
        let state = find(ctx, &value)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", value)))?;
        ctx.store
            .delete_set_state(ctx.team_id, ctx.app_id, state.id)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateType;
    use crate::store::{MemoryStore, StateStore};
    use serde_json::json;

    fn ctx(store: &MemoryStore) -> StateContext<'_> {
        StateContext {
            store,
            team_id: 7,
            app_id: 42,
            state_type: StateType::DisplayName,
        }
    }

    async fn members(store: &MemoryStore) -> Vec<String> {
        let mut values: Vec<String> = store
            .list_set_states(7, 42, None, EDIT_VERSION)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.value)
            .collect();
        values.sort();
        values
    }

    #[tokio::test]
    async fn test_create_and_conflict() {
        let store = MemoryStore::new();
        create(&ctx(&store), &[json!("btn1"), json!("btn2")]).await.unwrap();
        assert!(matches!(
            create(&ctx(&store), &[json!("btn1")]).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(members(&store).await, vec!["btn1", "btn2"]);
    }

    #[tokio::test]
    async fn test_update_renames_member() {
        let store = MemoryStore::new();
        create(&ctx(&store), &[json!("btn1")]).await.unwrap();
        update(&ctx(&store), &[json!({"before": "btn1", "after": "btn9"})])
            .await
            .unwrap();
        assert_eq!(members(&store).await, vec!["btn9"]);

        assert!(matches!(
            update(&ctx(&store), &[json!({"before": "ghost", "after": "x"})]).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        upsert(&ctx(&store), &[json!("a"), json!("a")]).await.unwrap();
        upsert(&ctx(&store), &[json!({"before": "zz", "after": "b"})])
            .await
            .unwrap();
        assert_eq!(members(&store).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        create(&ctx(&store), &[json!("a"), json!("b")]).await.unwrap();
        delete(&ctx(&store), &[json!("a")]).await.unwrap();
        assert!(matches!(
            delete(&ctx(&store), &[json!("a")]).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(members(&store).await, vec!["b"]);
    }
}
