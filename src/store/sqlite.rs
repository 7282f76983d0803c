//! SQLite-backed [`StateStore`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::StateStore;
use crate::error::{AppError, Result};
use crate::models::{
    Action, App, AppSnapshot, EditedBy, KvState, ModifyHistory, SetState, StateType, TreeState,
};

/// Database store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool and bring the schema up to date
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Turn a unique-constraint violation into `Conflict`
fn conflict_or(e: sqlx::Error, what: impl FnOnce() -> String) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(what()),
        _ => AppError::Database(e),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AppError::Internal(format!("Encode failed: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str, column: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| AppError::Internal(format!("Invalid {} column: {}", column, e)))
}

fn parse_state_type(text: &str) -> Result<StateType> {
    text.parse()
        .map_err(|e| AppError::Internal(format!("Invalid state type: {}", e)))
}

#[async_trait]
impl StateStore for SqliteStore {
    // Application operations

    async fn insert_app(&self, app: &App) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (id, team_id, name, mainline_version, release_version, edited_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(app.id)
        .bind(app.team_id)
        .bind(&app.name)
        .bind(app.mainline_version)
        .bind(app.release_version)
        .bind(to_json(&app.edited_by)?)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("App {} already exists", app.id)))?;
        Ok(())
    }

    async fn get_app(&self, team_id: i64, app_id: i64) -> Result<App> {
        let row = sqlx::query_as::<_, AppRow>(
            r#"
            SELECT id, team_id, name, mainline_version, release_version, edited_by, created_at, updated_at
            FROM apps
            WHERE team_id = ? AND id = ?
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("App {} not found", app_id)))?;

        row.try_into()
    }

    async fn update_app(&self, app: &App) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE apps
            SET name = ?, mainline_version = ?, release_version = ?, edited_by = ?, updated_at = ?
            WHERE team_id = ? AND id = ?
            "#,
        )
        .bind(&app.name)
        .bind(app.mainline_version)
        .bind(app.release_version)
        .bind(to_json(&app.edited_by)?)
        .bind(app.updated_at)
        .bind(app.team_id)
        .bind(app.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("App {} not found", app.id)));
        }
        Ok(())
    }

    // Tree state operations

    async fn create_tree_state(&self, mut state: TreeState) -> Result<TreeState> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO tree_states (state_type, team_id, app_id, version, name, content, parent_node, children_ids, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.state_type.as_str())
        .bind(state.team_id)
        .bind(state.app_id)
        .bind(state.version)
        .bind(&state.name)
        .bind(to_json(&state.content)?)
        .bind(&state.parent_node)
        .bind(to_json(&state.children_ids)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("Tree state {} already exists", state.name)))?;

        state.id = result.last_insert_rowid();
        state.created_at = now;
        state.updated_at = now;
        Ok(state)
    }

    async fn get_tree_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<TreeState> {
        let row = sqlx::query_as::<_, TreeRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, name, content, parent_node, children_ids, created_at, updated_at
            FROM tree_states
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Tree state {} not found", id)))?;

        row.try_into()
    }

    async fn update_tree_state(&self, state: &TreeState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tree_states
            SET name = ?, content = ?, parent_node = ?, children_ids = ?, updated_at = ?
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(&state.name)
        .bind(to_json(&state.content)?)
        .bind(&state.parent_node)
        .bind(to_json(&state.children_ids)?)
        .bind(Utc::now())
        .bind(state.team_id)
        .bind(state.app_id)
        .bind(state.id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("Tree state {} already exists", state.name)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Tree state {} not found",
                state.id
            )));
        }
        Ok(())
    }

    async fn delete_tree_states(&self, team_id: i64, app_id: i64, ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM tree_states WHERE team_id = ? AND app_id = ? AND id = ?")
                .bind(team_id)
                .bind(app_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_tree_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<TreeState>> {
        let rows = sqlx::query_as::<_, TreeRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, name, content, parent_node, children_ids, created_at, updated_at
            FROM tree_states
            WHERE team_id = ? AND app_id = ? AND version = ? AND (? IS NULL OR state_type = ?)
            ORDER BY id ASC
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(version)
        .bind(state_type.map(|t| t.as_str()))
        .bind(state_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_tree_state_by_name(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        name: &str,
    ) -> Result<Option<TreeState>> {
        let row = sqlx::query_as::<_, TreeRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, name, content, parent_node, children_ids, created_at, updated_at
            FROM tree_states
            WHERE team_id = ? AND app_id = ? AND state_type = ? AND version = ? AND name = ?
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(state_type.as_str())
        .bind(version)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn latest_tree_version(&self, team_id: i64, app_id: i64) -> Result<i64> {
        let version = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(version), 0) FROM tree_states WHERE team_id = ? AND app_id = ?",
        )
        .bind(team_id)
        .bind(app_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    // Kv state operations

    async fn create_kv_state(&self, mut state: KvState) -> Result<KvState> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO kv_states (state_type, team_id, app_id, version, key, value, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.state_type.as_str())
        .bind(state.team_id)
        .bind(state.app_id)
        .bind(state.version)
        .bind(&state.key)
        .bind(to_json(&state.value)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("Kv state {} already exists", state.key)))?;

        state.id = result.last_insert_rowid();
        state.created_at = now;
        state.updated_at = now;
        Ok(state)
    }

    async fn update_kv_state(&self, state: &KvState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE kv_states
            SET key = ?, value = ?, updated_at = ?
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(&state.key)
        .bind(to_json(&state.value)?)
        .bind(Utc::now())
        .bind(state.team_id)
        .bind(state.app_id)
        .bind(state.id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("Kv state {} already exists", state.key)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Kv state {} not found",
                state.id
            )));
        }
        Ok(())
    }

    async fn delete_kv_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM kv_states WHERE team_id = ? AND app_id = ? AND id = ?")
            .bind(team_id)
            .bind(app_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Kv state {} not found", id)));
        }
        Ok(())
    }

    async fn list_kv_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<KvState>> {
        let rows = sqlx::query_as::<_, KvRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, key, value, created_at, updated_at
            FROM kv_states
            WHERE team_id = ? AND app_id = ? AND version = ? AND (? IS NULL OR state_type = ?)
            ORDER BY id ASC
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(version)
        .bind(state_type.map(|t| t.as_str()))
        .bind(state_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_kv_state_by_key(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        key: &str,
    ) -> Result<Option<KvState>> {
        let row = sqlx::query_as::<_, KvRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, key, value, created_at, updated_at
            FROM kv_states
            WHERE team_id = ? AND app_id = ? AND state_type = ? AND version = ? AND key = ?
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(state_type.as_str())
        .bind(version)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    // Set state operations

    async fn create_set_state(&self, mut state: SetState) -> Result<SetState> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO set_states (state_type, team_id, app_id, version, value, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.state_type.as_str())
        .bind(state.team_id)
        .bind(state.app_id)
        .bind(state.version)
        .bind(&state.value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("Set state {} already exists", state.value)))?;

        state.id = result.last_insert_rowid();
        state.created_at = now;
        state.updated_at = now;
        Ok(state)
    }

    async fn update_set_state(&self, state: &SetState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE set_states
            SET value = ?, updated_at = ?
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(&state.value)
        .bind(Utc::now())
        .bind(state.team_id)
        .bind(state.app_id)
        .bind(state.id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, || format!("Set state {} already exists", state.value)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Set state {} not found",
                state.id
            )));
        }
        Ok(())
    }

    async fn delete_set_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM set_states WHERE team_id = ? AND app_id = ? AND id = ?")
                .bind(team_id)
                .bind(app_id)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Set state {} not found", id)));
        }
        Ok(())
    }

    async fn list_set_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<SetState>> {
        let rows = sqlx::query_as::<_, SetRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, value, created_at, updated_at
            FROM set_states
            WHERE team_id = ? AND app_id = ? AND version = ? AND (? IS NULL OR state_type = ?)
            ORDER BY id ASC
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(version)
        .bind(state_type.map(|t| t.as_str()))
        .bind(state_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_set_state_by_value(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        value: &str,
    ) -> Result<Option<SetState>> {
        let row = sqlx::query_as::<_, SetRow>(
            r#"
            SELECT id, state_type, team_id, app_id, version, value, created_at, updated_at
            FROM set_states
            WHERE team_id = ? AND app_id = ? AND state_type = ? AND version = ? AND value = ?
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(state_type.as_str())
        .bind(version)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    // Action operations

    async fn create_action(&self, mut action: Action) -> Result<Action> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO actions (team_id, app_id, version, resource_id, name, action_type, template, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action.team_id)
        .bind(action.app_id)
        .bind(action.version)
        .bind(action.resource_id)
        .bind(&action.name)
        .bind(&action.action_type)
        .bind(to_json(&action.template)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        action.id = result.last_insert_rowid();
        action.created_at = now;
        action.updated_at = now;
        Ok(action)
    }

    async fn update_action(&self, action: &Action) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET resource_id = ?, name = ?, action_type = ?, template = ?, updated_at = ?
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(action.resource_id)
        .bind(&action.name)
        .bind(&action.action_type)
        .bind(to_json(&action.template)?)
        .bind(Utc::now())
        .bind(action.team_id)
        .bind(action.app_id)
        .bind(action.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Action {} not found", action.id)));
        }
        Ok(())
    }

    async fn list_actions(&self, team_id: i64, app_id: i64, version: i64) -> Result<Vec<Action>> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, team_id, app_id, version, resource_id, name, action_type, template, created_at, updated_at
            FROM actions
            WHERE team_id = ? AND app_id = ? AND version = ?
            ORDER BY id ASC
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn delete_states_at_version(
        &self,
        team_id: i64,
        app_id: i64,
        version: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["tree_states", "kv_states", "set_states", "actions"] {
            let sql = format!(
                "DELETE FROM {} WHERE team_id = ? AND app_id = ? AND version = ?",
                table
            );
            sqlx::query(&sql)
                .bind(team_id)
                .bind(app_id)
                .bind(version)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // Snapshot operations

    async fn create_snapshot(&self, mut snapshot: AppSnapshot) -> Result<AppSnapshot> {
        let result = sqlx::query(
            r#"
            INSERT INTO app_snapshots (team_id, app_id, target_version, trigger_mode, modify_history, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.team_id)
        .bind(snapshot.app_id)
        .bind(snapshot.target_version)
        .bind(snapshot.trigger_mode.as_str())
        .bind(to_json(&snapshot.modify_history)?)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        snapshot.id = result.last_insert_rowid();
        Ok(snapshot)
    }

    async fn update_snapshot(&self, snapshot: &AppSnapshot) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE app_snapshots
            SET target_version = ?, trigger_mode = ?, modify_history = ?
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(snapshot.target_version)
        .bind(snapshot.trigger_mode.as_str())
        .bind(to_json(&snapshot.modify_history)?)
        .bind(snapshot.team_id)
        .bind(snapshot.app_id)
        .bind(snapshot.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Snapshot {} not found",
                snapshot.id
            )));
        }
        Ok(())
    }

    async fn get_snapshot(&self, team_id: i64, app_id: i64, id: i64) -> Result<AppSnapshot> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, team_id, app_id, target_version, trigger_mode, modify_history, created_at
            FROM app_snapshots
            WHERE team_id = ? AND app_id = ? AND id = ?
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Snapshot {} not found", id)))?;

        row.try_into()
    }

    async fn find_active_snapshot(
        &self,
        team_id: i64,
        app_id: i64,
    ) -> Result<Option<AppSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, team_id, app_id, target_version, trigger_mode, modify_history, created_at
            FROM app_snapshots
            WHERE team_id = ? AND app_id = ? AND target_version = 0
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_snapshots(&self, team_id: i64, app_id: i64) -> Result<Vec<AppSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, team_id, app_id, target_version, trigger_mode, modify_history, created_at
            FROM app_snapshots
            WHERE team_id = ? AND app_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

// Row types for database queries

#[derive(sqlx::FromRow)]
struct AppRow {
    id: i64,
    team_id: i64,
    name: String,
    mainline_version: i64,
    release_version: i64,
    edited_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppRow> for App {
    type Error = AppError;

    fn try_from(row: AppRow) -> Result<Self> {
        let edited_by: Vec<EditedBy> = from_json(&row.edited_by, "edited_by")?;
        Ok(App {
            id: row.id,
            team_id: row.team_id,
            name: row.name,
            mainline_version: row.mainline_version,
            release_version: row.release_version,
            edited_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TreeRow {
    id: i64,
    state_type: String,
    team_id: i64,
    app_id: i64,
    version: i64,
    name: String,
    content: String,
    parent_node: String,
    children_ids: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TreeRow> for TreeState {
    type Error = AppError;

    fn try_from(row: TreeRow) -> Result<Self> {
        Ok(TreeState {
            id: row.id,
            state_type: parse_state_type(&row.state_type)?,
            team_id: row.team_id,
            app_id: row.app_id,
            version: row.version,
            name: row.name,
            content: from_json(&row.content, "content")?,
            parent_node: row.parent_node,
            children_ids: from_json(&row.children_ids, "children_ids")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct KvRow {
    id: i64,
    state_type: String,
    team_id: i64,
    app_id: i64,
    version: i64,
    key: String,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<KvRow> for KvState {
    type Error = AppError;

    fn try_from(row: KvRow) -> Result<Self> {
        Ok(KvState {
            id: row.id,
            state_type: parse_state_type(&row.state_type)?,
            team_id: row.team_id,
            app_id: row.app_id,
            version: row.version,
            key: row.key,
            value: from_json(&row.value, "value")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SetRow {
    id: i64,
    state_type: String,
    team_id: i64,
    app_id: i64,
    version: i64,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SetRow> for SetState {
    type Error = AppError;

    fn try_from(row: SetRow) -> Result<Self> {
        Ok(SetState {
            id: row.id,
            state_type: parse_state_type(&row.state_type)?,
            team_id: row.team_id,
            app_id: row.app_id,
            version: row.version,
            value: row.value,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: i64,
    team_id: i64,
    app_id: i64,
    version: i64,
    resource_id: i64,
    name: String,
    action_type: String,
    template: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ActionRow> for Action {
    type Error = AppError;

    fn try_from(row: ActionRow) -> Result<Self> {
        Ok(Action {
            id: row.id,
            team_id: row.team_id,
            app_id: row.app_id,
            version: row.version,
            resource_id: row.resource_id,
            name: row.name,
            action_type: row.action_type,
            template: from_json(&row.template, "template")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    team_id: i64,
    app_id: i64,
    target_version: i64,
    trigger_mode: String,
    modify_history: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for AppSnapshot {
    type Error = AppError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        let modify_history: Vec<ModifyHistory> = from_json(&row.modify_history, "modify_history")?;
        Ok(AppSnapshot {
            id: row.id,
            team_id: row.team_id,
            app_id: row.app_id,
            target_version: row.target_version,
            trigger_mode: row
                .trigger_mode
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid trigger mode: {}", e)))?,
            modify_history,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tree_row_try_from_invalid_state_type() {
        let row = TreeRow {
            id: 1,
            state_type: "bogus".to_string(),
            team_id: 1,
            app_id: 1,
            version: 0,
            name: "btn1".to_string(),
            content: "{}".to_string(),
            parent_node: "root".to_string(),
            children_ids: "[]".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result: Result<TreeState> = row.try_into();
        assert!(matches!(result.unwrap_err(), AppError::Internal(_)));
    }

    #[test]
    fn test_tree_row_try_from_invalid_children() {
        let row = TreeRow {
            id: 1,
            state_type: "components".to_string(),
            team_id: 1,
            app_id: 1,
            version: 0,
            name: "btn1".to_string(),
            content: "{}".to_string(),
            parent_node: "root".to_string(),
            children_ids: "not json".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result: Result<TreeState> = row.try_into();
        assert!(result.is_err());
    }

    #[test]
    fn test_kv_row_try_from() {
        let row = KvRow {
            id: 3,
            state_type: "dependencies".to_string(),
            team_id: 1,
            app_id: 2,
            version: 0,
            key: "a".to_string(),
            value: r#"["x"]"#.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let state: KvState = row.try_into().unwrap();
        assert_eq!(state.state_type, StateType::Dependencies);
        assert_eq!(state.value, json!(["x"]));
    }

    #[test]
    fn test_snapshot_row_try_from_invalid_mode() {
        let row = SnapshotRow {
            id: 1,
            team_id: 1,
            app_id: 1,
            target_version: 0,
            trigger_mode: "hourly".to_string(),
            modify_history: "[]".to_string(),
            created_at: Utc::now(),
        };
        let result: Result<AppSnapshot> = row.try_into();
        assert!(result.is_err());
    }
}
