//! In-memory [`StateStore`] used by dispatcher and engine tests

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::StateStore;
use crate::error::{AppError, Result};
use crate::models::{Action, App, AppSnapshot, KvState, SetState, StateType, TreeState};

#[derive(Default)]
struct Inner {
    next_id: i64,
    apps: HashMap<(i64, i64), App>,
    trees: BTreeMap<i64, TreeState>,
    kvs: BTreeMap<i64, KvState>,
    sets: BTreeMap<i64, SetState>,
    actions: BTreeMap<i64, Action>,
    snapshots: BTreeMap<i64, AppSnapshot>,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("Memory store lock poisoned".to_string()))
    }
}

fn in_scope(team_id: i64, app_id: i64, version: i64, t: i64, a: i64, v: i64) -> bool {
    team_id == t && app_id == a && version == v
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert_app(&self, app: &App) -> Result<()> {
        let mut inner = self.lock()?;
        let key = (app.team_id, app.id);
        if inner.apps.contains_key(&key) {
            return Err(AppError::Conflict(format!("App {} already exists", app.id)));
        }
        inner.apps.insert(key, app.clone());
        Ok(())
    }

    async fn get_app(&self, team_id: i64, app_id: i64) -> Result<App> {
        self.lock()?
            .apps
            .get(&(team_id, app_id))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("App {} not found", app_id)))
    }

    async fn update_app(&self, app: &App) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.apps.get_mut(&(app.team_id, app.id)) {
            Some(current) => {
                *current = app.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("App {} not found", app.id))),
        }
    }

    async fn create_tree_state(&self, mut state: TreeState) -> Result<TreeState> {
        let mut inner = self.lock()?;
        let taken = inner.trees.values().any(|s| {
            in_scope(state.team_id, state.app_id, state.version, s.team_id, s.app_id, s.version)
                && s.state_type == state.state_type
                && s.name == state.name
        });
        if taken {
            return Err(AppError::Conflict(format!(
                "Tree state {} already exists",
                state.name
            )));
        }
        state.id = inner.allocate_id();
        inner.trees.insert(state.id, state.clone());
        Ok(state)
    }

    async fn get_tree_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<TreeState> {
        self.lock()?
            .trees
            .get(&id)
            .filter(|s| s.team_id == team_id && s.app_id == app_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Tree state {} not found", id)))
    }

    async fn update_tree_state(&self, state: &TreeState) -> Result<()> {
        let mut inner = self.lock()?;
        let clash = inner.trees.values().any(|s| {
            s.id != state.id
                && in_scope(state.team_id, state.app_id, state.version, s.team_id, s.app_id, s.version)
                && s.state_type == state.state_type
                && s.name == state.name
        });
        if clash {
            return Err(AppError::Conflict(format!(
                "Tree state {} already exists",
                state.name
            )));
        }
        match inner.trees.get_mut(&state.id) {
            Some(current) => {
                *current = state.clone();
                current.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Tree state {} not found",
                state.id
            ))),
        }
    }

    async fn delete_tree_states(&self, team_id: i64, app_id: i64, ids: &[i64]) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .trees
            .retain(|id, s| !(ids.contains(id) && s.team_id == team_id && s.app_id == app_id));
        Ok(())
    }

    async fn list_tree_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<TreeState>> {
        Ok(self
            .lock()?
            .trees
            .values()
            .filter(|s| in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version))
            .filter(|s| state_type.map_or(true, |t| t == s.state_type))
            .cloned()
            .collect())
    }

    async fn find_tree_state_by_name(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        name: &str,
    ) -> Result<Option<TreeState>> {
        Ok(self
            .lock()?
            .trees
            .values()
            .find(|s| {
                in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version)
                    && s.state_type == state_type
                    && s.name == name
            })
            .cloned())
    }

    async fn latest_tree_version(&self, team_id: i64, app_id: i64) -> Result<i64> {
        Ok(self
            .lock()?
            .trees
            .values()
            .filter(|s| s.team_id == team_id && s.app_id == app_id)
            .map(|s| s.version)
            .max()
            .unwrap_or(0))
    }

    async fn create_kv_state(&self, mut state: KvState) -> Result<KvState> {
        let mut inner = self.lock()?;
        let taken = inner.kvs.values().any(|s| {
            in_scope(state.team_id, state.app_id, state.version, s.team_id, s.app_id, s.version)
                && s.state_type == state.state_type
                && s.key == state.key
        });
        if taken {
            return Err(AppError::Conflict(format!(
                "Kv state {} already exists",
                state.key
            )));
        }
        state.id = inner.allocate_id();
        inner.kvs.insert(state.id, state.clone());
        Ok(state)
    }

    async fn update_kv_state(&self, state: &KvState) -> Result<()> {
        let mut inner = self.lock()?;
        let clash = inner.kvs.values().any(|s| {
            s.id != state.id
                && in_scope(state.team_id, state.app_id, state.version, s.team_id, s.app_id, s.version)
                && s.state_type == state.state_type
                && s.key == state.key
        });
        if clash {
            return Err(AppError::Conflict(format!(
                "Kv state {} already exists",
                state.key
            )));
        }
        match inner.kvs.get_mut(&state.id) {
            Some(current) => {
                *current = state.clone();
                current.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Kv state {} not found",
                state.id
            ))),
        }
    }

    async fn delete_kv_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<()> {
        let mut inner = self.lock()?;
        let owned = inner
            .kvs
            .get(&id)
            .is_some_and(|s| s.team_id == team_id && s.app_id == app_id);
        if !owned {
            return Err(AppError::NotFound(format!("Kv state {} not found", id)));
        }
        inner.kvs.remove(&id);
        Ok(())
    }

    async fn list_kv_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<KvState>> {
        Ok(self
            .lock()?
            .kvs
            .values()
            .filter(|s| in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version))
            .filter(|s| state_type.map_or(true, |t| t == s.state_type))
            .cloned()
            .collect())
    }

    async fn find_kv_state_by_key(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        key: &str,
    ) -> Result<Option<KvState>> {
        Ok(self
            .lock()?
            .kvs
            .values()
            .find(|s| {
                in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version)
                    && s.state_type == state_type
                    && s.key == key
            })
            .cloned())
    }

    async fn create_set_state(&self, mut state: SetState) -> Result<SetState> {
        let mut inner = self.lock()?;
        let taken = inner.sets.values().any(|s| {
            in_scope(state.team_id, state.app_id, state.version, s.team_id, s.app_id, s.version)
                && s.state_type == state.state_type
                && s.value == state.value
        });
        if taken {
            return Err(AppError::Conflict(format!(
                "Set state {} already exists",
                state.value
            )));
        }
        state.id = inner.allocate_id();
        inner.sets.insert(state.id, state.clone());
        Ok(state)
    }

    async fn update_set_state(&self, state: &SetState) -> Result<()> {
        let mut inner = self.lock()?;
        let clash = inner.sets.values().any(|s| {
            s.id != state.id
                && in_scope(state.team_id, state.app_id, state.version, s.team_id, s.app_id, s.version)
                && s.state_type == state.state_type
                && s.value == state.value
        });
        if clash {
            return Err(AppError::Conflict(format!(
                "Set state {} already exists",
                state.value
            )));
        }
        match inner.sets.get_mut(&state.id) {
            Some(current) => {
                *current = state.clone();
                current.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Set state {} not found",
                state.id
            ))),
        }
    }

    async fn delete_set_state(&self, team_id: i64, app_id: i64, id: i64) -> Result<()> {
        let mut inner = self.lock()?;
        let owned = inner
            .sets
            .get(&id)
            .is_some_and(|s| s.team_id == team_id && s.app_id == app_id);
        if !owned {
            return Err(AppError::NotFound(format!("Set state {} not found", id)));
        }
        inner.sets.remove(&id);
        Ok(())
    }

    async fn list_set_states(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: Option<StateType>,
        version: i64,
    ) -> Result<Vec<SetState>> {
        Ok(self
            .lock()?
            .sets
            .values()
            .filter(|s| in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version))
            .filter(|s| state_type.map_or(true, |t| t == s.state_type))
            .cloned()
            .collect())
    }

    async fn find_set_state_by_value(
        &self,
        team_id: i64,
        app_id: i64,
        state_type: StateType,
        version: i64,
        value: &str,
    ) -> Result<Option<SetState>> {
        Ok(self
            .lock()?
            .sets
            .values()
            .find(|s| {
                in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version)
                    && s.state_type == state_type
                    && s.value == value
            })
            .cloned())
    }

    async fn create_action(&self, mut action: Action) -> Result<Action> {
        let mut inner = self.lock()?;
        action.id = inner.allocate_id();
        inner.actions.insert(action.id, action.clone());
        Ok(action)
    }

    async fn update_action(&self, action: &Action) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.actions.get_mut(&action.id) {
            Some(current) => {
                *current = action.clone();
                current.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Action {} not found", action.id))),
        }
    }

    async fn list_actions(&self, team_id: i64, app_id: i64, version: i64) -> Result<Vec<Action>> {
        Ok(self
            .lock()?
            .actions
            .values()
            .filter(|a| in_scope(team_id, app_id, version, a.team_id, a.app_id, a.version))
            .cloned()
            .collect())
    }

    async fn delete_states_at_version(
        &self,
        team_id: i64,
        app_id: i64,
        version: i64,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .trees
            .retain(|_, s| !in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version));
        inner
            .kvs
            .retain(|_, s| !in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version));
        inner
            .sets
            .retain(|_, s| !in_scope(team_id, app_id, version, s.team_id, s.app_id, s.version));
        inner
            .actions
            .retain(|_, a| !in_scope(team_id, app_id, version, a.team_id, a.app_id, a.version));
        Ok(())
    }

    async fn create_snapshot(&self, mut snapshot: AppSnapshot) -> Result<AppSnapshot> {
        let mut inner = self.lock()?;
        snapshot.id = inner.allocate_id();
        inner.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(snapshot)
    }

    async fn update_snapshot(&self, snapshot: &AppSnapshot) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.snapshots.get_mut(&snapshot.id) {
            Some(current) => {
                *current = snapshot.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Snapshot {} not found",
                snapshot.id
            ))),
        }
    }

    async fn get_snapshot(&self, team_id: i64, app_id: i64, id: i64) -> Result<AppSnapshot> {
        self.lock()?
            .snapshots
            .get(&id)
            .filter(|s| s.team_id == team_id && s.app_id == app_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Snapshot {} not found", id)))
    }

    async fn find_active_snapshot(
        &self,
        team_id: i64,
        app_id: i64,
    ) -> Result<Option<AppSnapshot>> {
        Ok(self
            .lock()?
            .snapshots
            .values()
            .find(|s| s.team_id == team_id && s.app_id == app_id && s.is_active())
            .cloned())
    }

    async fn list_snapshots(&self, team_id: i64, app_id: i64) -> Result<Vec<AppSnapshot>> {
        let mut snapshots: Vec<AppSnapshot> = self
            .lock()?
            .snapshots
            .values()
            .filter(|s| s.team_id == team_id && s.app_id == app_id)
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(snapshots)
    }
}
