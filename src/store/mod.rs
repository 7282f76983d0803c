//! Versioned persistence of applications, tree/kv/set states, actions and snapshots
//!
//! Every record carries an integer version; [`EDIT_VERSION`](crate::models::EDIT_VERSION)
//! is the live editable one. Handlers reach persistence only through
//! [`StateStore`], which has a SQLite implementation and an in-memory one.

mod memory;
mod sqlite;
pub mod version;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Action, App, AppSnapshot, KvState, SetState, StateType, TreeState};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use version::{delete_version, duplicate_version, load_version};

#[async_trait]
pub trait StateStore: Send + Sync {
    // Applications

    async fn insert_app(&self, app: &App) -> Result<()>;

    async fn get_app(&self, team_id: i64, app_id: i64) -> Result<App>;

    async fn update_app(&self, app: &App) -> Result<()>;

    // Tree states

    /// Insert a node; fails with `Conflict` when the display name is taken
    async fn create_tree_state(&self, state: TreeState) -> Result<TreeState>;

    async fn get_tree_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<TreeState>;

    async fn update_tree_state(&self, state: &TreeState) -> Result<()>;

    async fn delete_tree_states(&self, team_id: i64, app_id: i64, ids: &[i64]) -> Result<()>;

    /// All nodes at `version`, optionally narrowed to one state type
    async fn list_tree_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<TreeState>>;

    async fn find_tree_state_by_name(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        name: &str,
    ) -> Result<Option<TreeState>>;

    /// Highest version any tree node of the app is stored under
    async fn latest_tree_version(&self, team_id: i64, app_id: i64) -> Result<i64>;

    // Kv states

    /// Insert a record; fails with `Conflict` when the key is taken
    async fn create_kv_state(&self, state: KvState) -> Result<KvState>;

    async fn update_kv_state(&self, state: &KvState) -> Result<()>;

    async fn delete_kv_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<()>;

    async fn list_kv_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<KvState>>;

    async fn find_kv_state_by_key(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        key: &str,
    ) -> Result<Option<KvState>>;

    // Set states

    /// Insert a member; fails with `Conflict` when the value is present
    async fn create_set_state(&self, state: SetState) -> Result<SetState>;

    async fn update_set_state(&self, state: &SetState) -> Result<()>;

    async fn delete_set_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<()>;

    async fn list_set_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<SetState>>;

    async fn find_set_state_by_value(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        value: &str,
    ) -> Result<Option<SetState>>;

    // Actions

    async fn create_action(&self, action: Action) -> Result<Action>;

    async fn update_action(&self, action: &Action) -> Result<()>;

    async fn list_actions(&self, team_id: i64, app_id: i64, version: i64) -> Result<Vec<Action>>;

    // Bulk

    /// Remove every tree/kv/set/action record stored under `version`
    async fn delete_states_at_version(&self, team_id: i64, app_id: i64, version: i64)
        -> Result<()>;

    // Snapshots

    async fn create_snapshot(&self, snapshot: AppSnapshot) -> Result<AppSnapshot>;

    async fn update_snapshot(&self, snapshot: &AppSnapshot) -> Result<()>;

    async fn get_snapshot(&self, team_id: i64, app_id: i64, id: i64) -> Result<AppSnapshot>;

    /// The snapshot targeting the edit version, if one exists
    async fn find_active_snapshot(&self, team_id: i64, app_id: i64)
        -> Result<Option<AppSnapshot>>;

    /// Every snapshot of the app, newest first
    async fn list_snapshots(&self, team_id: i64, app_id: i64) -> Result<Vec<AppSnapshot>>;
}
