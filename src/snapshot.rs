//! Modify history, archival, recovery and publishing of application versions

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    App, AppSnapshot, ModifyHistory, ModifyOperation, TriggerMode, EDIT_VERSION,
};
use crate::protocol::{BroadcastType, Target};
use crate::store::{delete_version, duplicate_version, StateStore};

/// Entries kept in a snapshot's modify history
pub const HISTORY_WINDOW: usize = 10;

pub struct SnapshotEngine {
    store: Arc<dyn StateStore>,
    archive_period: chrono::Duration,
}

impl SnapshotEngine {
    pub fn new(store: Arc<dyn StateStore>, archive_period: Duration) -> Self {
        let archive_period = chrono::Duration::milliseconds(
            i64::try_from(archive_period.as_millis()).unwrap_or(i64::MAX),
        );
        Self {
            store,
            archive_period,
        }
    }

    /// The active snapshot, created with trigger mode `auto` if missing
    pub async fn ensure_active(
        &self,
        team_id: i64,
        app_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AppSnapshot> {
        if let Some(active) = self.store.find_active_snapshot(team_id, app_id).await? {
            return Ok(active);
        }
        let created = self
            .store
            .create_snapshot(AppSnapshot::active(team_id, app_id, TriggerMode::Auto, now))
            .await?;
        tracing::debug!(team_id, app_id, snapshot = created.id, "Created active snapshot");
        Ok(created)
    }

    /// Append to the active snapshot's history, evicting the oldest entries
    pub async fn record_history(
        &self,
        team_id: i64,
        app_id: i64,
        entry: ModifyHistory,
    ) -> Result<()> {
        let mut active = self.ensure_active(team_id, app_id, entry.modified_at).await?;
        push_bounded(&mut active.modify_history, entry);
        self.store.update_snapshot(&active).await
    }

    /// Archive when the active snapshot has outlived the archival period
    pub async fn maybe_archive(
        &self,
        team_id: i64,
        app_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<AppSnapshot>> {
        let Some(active) = self.store.find_active_snapshot(team_id, app_id).await? else {
            return Ok(None);
        };
        if now - active.created_at <= self.archive_period {
            return Ok(None);
        }
        self.archive(team_id, app_id, TriggerMode::Auto, now)
            .await
            .map(Some)
    }

    /// Freeze the edit version under a new mainline version.
    ///
    /// The current active snapshot becomes the archived record and a fresh
    /// active snapshot with `trigger_mode` takes its place. Returns the
    /// archived snapshot.
    pub async fn archive(
        &self,
        team_id: i64,
        app_id: i64,
        trigger_mode: TriggerMode,
        now: DateTime<Utc>,
    ) -> Result<AppSnapshot> {
        let mut app = self.store.get_app(team_id, app_id).await?;
        let latest = self.store.latest_tree_version(team_id, app_id).await?;
        let mainline = app.mainline_version.max(latest) + 1;

        duplicate_version(self.store.as_ref(), team_id, app_id, EDIT_VERSION, mainline).await?;

        let mut archived = self.ensure_active(team_id, app_id, now).await?;
        archived.target_version = mainline;
        self.store.update_snapshot(&archived).await?;

        self.store
            .create_snapshot(AppSnapshot::active(team_id, app_id, trigger_mode, now))
            .await?;

        app.mainline_version = mainline;
        app.touch(now);
        self.store.update_app(&app).await?;

        tracing::info!(
            team_id,
            app_id,
            mainline,
            trigger = trigger_mode.as_str(),
            "Archived edit version"
        );
        Ok(archived)
    }

    /// Restore the edit version from an archived snapshot
    pub async fn recover(
        &self,
        team_id: i64,
        app_id: i64,
        snapshot_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AppSnapshot> {
        let target = self.store.get_snapshot(team_id, app_id, snapshot_id).await?;
        if target.is_active() {
            return Err(AppError::BadRequest(
                "The active snapshot cannot be recovered".to_string(),
            ));
        }

        self.archive(team_id, app_id, TriggerMode::Auto, now).await?;
        delete_version(self.store.as_ref(), team_id, app_id, EDIT_VERSION).await?;
        duplicate_version(
            self.store.as_ref(),
            team_id,
            app_id,
            target.target_version,
            EDIT_VERSION,
        )
        .await?;

        self.record_history(
            team_id,
            app_id,
            ModifyHistory {
                operation: ModifyOperation::RecoverSnapshot,
                operation_target: Target::Apps,
                operation_target_name: String::new(),
                broadcast_type: BroadcastType::ForceRefresh.as_str().to_string(),
                broadcast_payload: Value::Null,
                modified_by: user_id,
                modified_at: now,
                recovered_from: Some(target.created_at),
            },
        )
        .await?;

        tracing::info!(
            team_id,
            app_id,
            snapshot = snapshot_id,
            version = target.target_version,
            "Recovered snapshot into edit version"
        );
        Ok(target)
    }

    /// Archive the edit version and serve it as the new release
    pub async fn publish(&self, team_id: i64, app_id: i64, now: DateTime<Utc>) -> Result<App> {
        let archived = self.archive(team_id, app_id, TriggerMode::Auto, now).await?;
        let mut app = self.store.get_app(team_id, app_id).await?;
        app.release_version = archived.target_version;
        self.store.update_app(&app).await?;
        tracing::info!(team_id, app_id, release = app.release_version, "Published release");
        Ok(app)
    }
}

fn push_bounded(history: &mut Vec<ModifyHistory>, entry: ModifyHistory) {
    history.push(entry);
    if history.len() > HISTORY_WINDOW {
        let excess = history.len() - HISTORY_WINDOW;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KvState, StateType, TreeState, ROOT_DISPLAY_NAME};
    use crate::store::MemoryStore;
    use crate::tree::shape;
    use serde_json::json;

    const TEAM: i64 = 7;
    const APP: i64 = 42;

    fn entry(n: i64, at: DateTime<Utc>) -> ModifyHistory {
        ModifyHistory {
            operation: ModifyOperation::CreateState,
            operation_target: Target::Components,
            operation_target_name: format!("btn{}", n),
            broadcast_type: "components/createState".to_string(),
            broadcast_payload: Value::Null,
            modified_by: n,
            modified_at: at,
            recovered_from: None,
        }
    }

    async fn seeded() -> (Arc<MemoryStore>, SnapshotEngine) {
        let store = Arc::new(MemoryStore::new());
        store.insert_app(&App::new(TEAM, APP, "demo")).await.unwrap();

        let mut root = store
            .create_tree_state(TreeState::new(TEAM, APP, EDIT_VERSION, ROOT_DISPLAY_NAME, "", json!({})))
            .await
            .unwrap();
        let btn = store
            .create_tree_state(TreeState::new(TEAM, APP, EDIT_VERSION, "btn1", ROOT_DISPLAY_NAME, json!({"x": 1})))
            .await
            .unwrap();
        root.children_ids.push(btn.id);
        store.update_tree_state(&root).await.unwrap();
        store
            .create_kv_state(KvState::new(StateType::Dependencies, TEAM, APP, EDIT_VERSION, "a", json!(["x"])))
            .await
            .unwrap();

        let engine = SnapshotEngine::new(store.clone(), Duration::from_secs(300));
        (store, engine)
    }

    #[test]
    fn test_push_bounded_keeps_most_recent() {
        let now = Utc::now();
        let mut history = Vec::new();
        for n in 0..13 {
            push_bounded(&mut history, entry(n, now));
        }
        assert_eq!(history.len(), HISTORY_WINDOW);
        assert_eq!(history[0].modified_by, 3);
        assert_eq!(history[HISTORY_WINDOW - 1].modified_by, 12);
    }

    #[tokio::test]
    async fn test_ensure_active_is_unique() {
        let (store, engine) = seeded().await;
        let now = Utc::now();
        let first = engine.ensure_active(TEAM, APP, now).await.unwrap();
        let second = engine.ensure_active(TEAM, APP, now).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_snapshots(TEAM, APP).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_history_bounded() {
        let (store, engine) = seeded().await;
        let now = Utc::now();
        for n in 0..12 {
            engine.record_history(TEAM, APP, entry(n, now)).await.unwrap();
        }
        let active = store.find_active_snapshot(TEAM, APP).await.unwrap().unwrap();
        assert_eq!(active.modify_history.len(), HISTORY_WINDOW);
        assert_eq!(active.modify_history[0].modified_by, 2);
    }

    #[tokio::test]
    async fn test_maybe_archive_respects_period() {
        let (store, engine) = seeded().await;
        let created = Utc::now();
        engine.ensure_active(TEAM, APP, created).await.unwrap();

        let soon = created + chrono::Duration::seconds(10);
        assert!(engine.maybe_archive(TEAM, APP, soon).await.unwrap().is_none());

        let later = created + chrono::Duration::seconds(301);
        let archived = engine.maybe_archive(TEAM, APP, later).await.unwrap().unwrap();
        assert_eq!(archived.target_version, 1);
        assert_eq!(store.get_app(TEAM, APP).await.unwrap().mainline_version, 1);
    }

    #[tokio::test]
    async fn test_archive_duplicates_and_resets_active() {
        let (store, engine) = seeded().await;
        let now = Utc::now();
        engine.record_history(TEAM, APP, entry(1, now)).await.unwrap();

        let archived = engine.archive(TEAM, APP, TriggerMode::Manual, now).await.unwrap();
        assert_eq!(archived.target_version, 1);
        assert_eq!(archived.modify_history.len(), 1);

        let active = store.find_active_snapshot(TEAM, APP).await.unwrap().unwrap();
        assert!(active.modify_history.is_empty());
        assert_eq!(active.trigger_mode, TriggerMode::Manual);

        let edit = store.list_tree_states(TEAM, APP, None, EDIT_VERSION).await.unwrap();
        let frozen = store.list_tree_states(TEAM, APP, None, 1).await.unwrap();
        assert_eq!(shape(&edit), shape(&frozen));
        assert_eq!(store.list_kv_states(TEAM, APP, None, 1).await.unwrap().len(), 1);

        let second = engine.archive(TEAM, APP, TriggerMode::Auto, now).await.unwrap();
        assert_eq!(second.target_version, 2);
        let snapshots = store.list_snapshots(TEAM, APP).await.unwrap();
        assert_eq!(snapshots.iter().filter(|s| s.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_recover_restores_tree() {
        let (store, engine) = seeded().await;
        let now = Utc::now();
        let archived = engine.archive(TEAM, APP, TriggerMode::Auto, now).await.unwrap();
        let before = shape(&store.list_tree_states(TEAM, APP, None, EDIT_VERSION).await.unwrap());

        // Diverge the edit version
        let extra = TreeState::new(TEAM, APP, EDIT_VERSION, "btn2", ROOT_DISPLAY_NAME, json!({}));
        store.create_tree_state(extra).await.unwrap();

        engine.recover(TEAM, APP, archived.id, 9, now).await.unwrap();

        let after = shape(&store.list_tree_states(TEAM, APP, None, EDIT_VERSION).await.unwrap());
        assert_eq!(before, after);

        let active = store.find_active_snapshot(TEAM, APP).await.unwrap().unwrap();
        let last = active.modify_history.last().unwrap();
        assert_eq!(last.operation, ModifyOperation::RecoverSnapshot);
        assert_eq!(last.modified_by, 9);
        assert_eq!(last.recovered_from, Some(archived.created_at));
        assert_eq!(store.get_app(TEAM, APP).await.unwrap().mainline_version, 2);
    }

    #[tokio::test]
    async fn test_recover_rejects_active() {
        let (_store, engine) = seeded().await;
        let active = engine.ensure_active(TEAM, APP, Utc::now()).await.unwrap();
        let result = engine.recover(TEAM, APP, active.id, 1, Utc::now()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_publish_bumps_release() {
        let (store, engine) = seeded().await;
        let app = engine.publish(TEAM, APP, Utc::now()).await.unwrap();
        assert_eq!(app.release_version, 1);
        assert_eq!(app.mainline_version, 1);
        assert_eq!(store.list_tree_states(TEAM, APP, None, 1).await.unwrap().len(), 2);
    }
}
