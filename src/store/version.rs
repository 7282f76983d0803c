//! Whole-version operations built on top of [`StateStore`].
//!
//! Duplication gives every copied record a fresh identity. Tree child lists are
//! rewritten through a map from old id to new id built during the pass. Records
//! already present under the destination version (same state type and display
//! name / key / value / action name) are overwritten rather than re-inserted, so
//! a duplication interrupted half-way can simply be run again.

use std::collections::HashMap;

use super::StateStore;
use crate::error::Result;
use crate::models::{StateType, TreeState, VersionContents};

/// Copy tree, kv, set and action records from `from` to `to`
pub async fn duplicate_version(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    from: i64,
    to: i64,
) -> Result<()> {
    duplicate_tree_states(store, team_id, app_id, from, to).await?;
    duplicate_kv_states(store, team_id, app_id, from, to).await?;
    duplicate_set_states(store, team_id, app_id, from, to).await?;
    duplicate_actions(store, team_id, app_id, from, to).await?;
    tracing::debug!(team_id, app_id, from, to, "Duplicated version");
    Ok(())
}

/// Remove every record stored under `version`
pub async fn delete_version(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    version: i64,
) -> Result<()> {
    store
        .delete_states_at_version(team_id, app_id, version)
        .await
}

/// Read every record stored under `version`
pub async fn load_version(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    version: i64,
) -> Result<VersionContents> {
    Ok(VersionContents {
        version,
        tree_states: store.list_tree_states(team_id, app_id, None, version).await?,
        kv_states: store.list_kv_states(team_id, app_id, None, version).await?,
        set_states: store.list_set_states(team_id, app_id, None, version).await?,
        actions: store.list_actions(team_id, app_id, version).await?,
    })
}

async fn duplicate_tree_states(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    from: i64,
    to: i64,
) -> Result<()> {
    let sources = store.list_tree_states(team_id, app_id, None, from).await?;
    let mut existing: HashMap<(StateType, String), TreeState> = store
        .list_tree_states(team_id, app_id, None, to)
        .await?
        .into_iter()
        .map(|s| ((s.state_type, s.name.clone()), s))
        .collect();

    // First pass: one destination node per source node, children unresolved
    let mut id_map: HashMap<i64, i64> = HashMap::with_capacity(sources.len());
    let mut copies: Vec<(Vec<i64>, TreeState)> = Vec::with_capacity(sources.len());
    for source in sources {
        let destination = match existing.remove(&(source.state_type, source.name.clone())) {
            Some(mut current) => {
                current.content = source.content.clone();
                current.parent_node = source.parent_node.clone();
                current
            }
            None => {
                let mut fresh = source.clone();
                fresh.id = 0;
                fresh.version = to;
                fresh.children_ids = Vec::new();
                store.create_tree_state(fresh).await?
            }
        };
        id_map.insert(source.id, destination.id);
        copies.push((source.children_ids, destination));
    }

    // Second pass: rewrite child references into the new id space
    for (source_children, mut destination) in copies {
        destination.children_ids = source_children
            .iter()
            .filter_map(|child| {
                let mapped = id_map.get(child).copied();
                if mapped.is_none() {
                    tracing::warn!(
                        team_id,
                        app_id,
                        node = %destination.name,
                        child,
                        "Dropping unresolved child reference during duplication"
                    );
                }
                mapped
            })
            .collect();
        store.update_tree_state(&destination).await?;
    }
    Ok(())
}

async fn duplicate_kv_states(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    from: i64,
    to: i64,
) -> Result<()> {
    let existing: HashMap<(StateType, String), _> = store
        .list_kv_states(team_id, app_id, None, to)
        .await?
        .into_iter()
        .map(|s| ((s.state_type, s.key.clone()), s))
        .collect();

    for source in store.list_kv_states(team_id, app_id, None, from).await? {
        match existing.get(&(source.state_type, source.key.clone())) {
            Some(current) => {
                let mut current = current.clone();
                current.value = source.value;
                store.update_kv_state(&current).await?;
            }
            None => {
                let mut fresh = source;
                fresh.id = 0;
                fresh.version = to;
                store.create_kv_state(fresh).await?;
            }
        }
    }
    Ok(())
}

async fn duplicate_set_states(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    from: i64,
    to: i64,
) -> Result<()> {
    let existing: Vec<(StateType, String)> = store
        .list_set_states(team_id, app_id, None, to)
        .await?
        .into_iter()
        .map(|s| (s.state_type, s.value))
        .collect();

    for source in store.list_set_states(team_id, app_id, None, from).await? {
        if existing.contains(&(source.state_type, source.value.clone())) {
            continue;
        }
        let mut fresh = source;
        fresh.id = 0;
        fresh.version = to;
        store.create_set_state(fresh).await?;
    }
    Ok(())
}

async fn duplicate_actions(
    store: &dyn StateStore,
    team_id: i64,
    app_id: i64,
    from: i64,
    to: i64,
) -> Result<()> {
    let existing: HashMap<String, _> = store
        .list_actions(team_id, app_id, to)
        .await?
        .into_iter()
        .map(|a| (a.name.clone(), a))
        .collect();

    for source in store.list_actions(team_id, app_id, from).await? {
        match existing.get(&source.name) {
            Some(current) => {
                let mut current = current.clone();
                current.resource_id = source.resource_id;
                current.action_type = source.action_type;
                current.template = source.template;
                store.update_action(&current).await?;
            }
            None => {
                let mut fresh = source;
                fresh.id = 0;
                fresh.version = to;
                store.create_action(fresh).await?;
            }
        }
    }
    Ok(())
}
