use serde::Deserialize;
use serde_json::{json, Value};

use super::StateContext;
use crate::error::{AppError, Result};
use crate::models::{TreeState, EDIT_VERSION, ROOT_DISPLAY_NAME};
use crate::tree::{ComponentNode, TreeIndex};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest {
    display_name: String,
    parent_node: String,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(rename = "displayName")]
    display_name: String,
}

async fn find(ctx: &StateContext<'_>, name: &str) -> Result<Option<TreeState>> {
    ctx.store
        .find_tree_state_by_name(ctx.team_id, ctx.app_id, ctx.state_type, EDIT_VERSION, name)
        .await
}

async fn require(ctx: &StateContext<'_>, name: &str) -> Result<TreeState> {
    find(ctx, name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Component {} not found", name)))
}

async fn list(ctx: &StateContext<'_>) -> Result<Vec<TreeState>> {
    ctx.store
        .list_tree_states(ctx.team_id, ctx.app_id, Some(ctx.state_type), EDIT_VERSION)
        .await
}

fn with_parent(content: Value, parent: &str) -> Value {
    match content {
        Value::Object(mut map) => {
            map.insert("parentNode".to_string(), Value::String(parent.to_string()));
            Value::Object(map)
        }
        other => other,
    }
}

fn new_node(ctx: &StateContext<'_>, name: &str, parent: &str, content: Value) -> TreeState {
    let mut state = TreeState::new(ctx.team_id, ctx.app_id, EDIT_VERSION, name, parent, content);
    state.state_type = ctx.state_type;
    state
}

/// Look up a parent, creating the root on first reference
async fn resolve_parent(ctx: &StateContext<'_>, name: &str) -> Result<TreeState> {
    if let Some(parent) = find(ctx, name).await? {
        return Ok(parent);
    }
    if name != ROOT_DISPLAY_NAME {
        return Err(AppError::NotFound(format!("Parent {} not found", name)));
    }
    let root = new_node(ctx, ROOT_DISPLAY_NAME, "", json!({"displayName": ROOT_DISPLAY_NAME}));
    let root = ctx.store.create_tree_state(root).await?;
    tracing::debug!(team_id = ctx.team_id, app_id = ctx.app_id, "Created implicit root");
    Ok(root)
}

/// Create one node and hang it under its parent
async fn insert_node(ctx: &StateContext<'_>, node: &ComponentNode) -> Result<TreeState> {
    if node.parent_node.is_empty() {
        let root = new_node(ctx, &node.display_name, "", node.content.clone());
        return ctx.store.create_tree_state(root).await;
    }
    let mut parent = resolve_parent(ctx, &node.parent_node).await?;
    let created = ctx
        .store
        .create_tree_state(new_node(
            ctx,
            &node.display_name,
            &node.parent_node,
            node.content.clone(),
        ))
        .await?;
    parent.children_ids.push(created.id);
    ctx.store.update_tree_state(&parent).await?;
    Ok(created)
}

/// Nodes of a subtree, parents before children
fn flatten(root: &ComponentNode) -> Vec<&ComponentNode> {
    let mut order = Vec::with_capacity(root.len());
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        order.push(node);
        stack.extend(node.children.iter().rev());
    }
    order
}

fn parse_nodes(payload: &[Value]) -> Result<Vec<ComponentNode>> {
    payload.iter().map(ComponentNode::parse).collect()
}

pub(super) async fn create(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for component in parse_nodes(payload)? {
        let nodes = flatten(&component);
        for node in &nodes {
            if find(ctx, &node.display_name).await?.is_some() {
                return Err(AppError::Conflict(format!(
                    "Component {} already exists",
                    node.display_name
                )));
            }
        }
        for node in nodes {
            insert_node(ctx, node).await?;
        }
    }
    Ok(())
}

pub(super) async fn upsert(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for component in parse_nodes(payload)? {
        for node in flatten(&component) {
            match find(ctx, &node.display_name).await? {
                Some(mut existing) => {
                    existing.content = with_parent(node.content.clone(), &existing.parent_node);
                    ctx.store.update_tree_state(&existing).await?;
                }
                None => {
                    insert_node(ctx, node).await?;
                }
            }
        }
    }
    Ok(())
}

pub(super) async fn update(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for item in payload {
        let (before, after) = match item.get("after") {
            Some(after) => {
                let before: NamedRef = item
                    .get("before")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .ok_or_else(|| AppError::BadRequest("Update is missing before".to_string()))?;
                (before.display_name, ComponentNode::parse(after)?)
            }
            None => {
                let node = ComponentNode::parse(item)?;
                (node.display_name.clone(), node)
            }
        };

        let mut existing = require(ctx, &before).await?;
        let renamed = existing.name != after.display_name;
        existing.name = after.display_name.clone();
        existing.content = with_parent(after.content, &existing.parent_node);
        ctx.store.update_tree_state(&existing).await?;

        if renamed {
            for child_id in &existing.children_ids {
                let mut child = ctx
                    .store
                    .get_tree_state(ctx.team_id, ctx.app_id, *child_id)
                    .await?;
                child.parent_node = existing.name.clone();
                child.content = with_parent(child.content, &existing.name);
                ctx.store.update_tree_state(&child).await?;
            }
        }
    }
    Ok(())
}

pub(super) async fn delete(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for name in super::as_strings(payload, "Component name")? {
        let node = require(ctx, &name).await?;
        let states = list(ctx).await?;
        let index = TreeIndex::new(&states);
        let doomed = index.subtree_ids(node.id);

        if let Some(parent) = index.by_name(&node.parent_node) {
            if !doomed.contains(&parent.id) {
                let mut parent = parent.clone();
                parent.children_ids.retain(|c| *c != node.id);
                ctx.store.update_tree_state(&parent).await?;
            }
        }
        ctx.store
            .delete_tree_states(ctx.team_id, ctx.app_id, &doomed)
            .await?;
        tracing::debug!(component = %name, removed = doomed.len(), "Deleted component subtree");
    }
    Ok(())
}

pub(super) async fn move_nodes(ctx: &StateContext<'_>, payload: &[Value]) -> Result<()> {
    for item in payload {
        let request: MoveRequest = serde_json::from_value(item.clone())?;
        let mut node = require(ctx, &request.display_name).await?;
        if node.parent_node.is_empty() {
            return Err(AppError::BadRequest("The root cannot be moved".to_string()));
        }
        let target = require(ctx, &request.parent_node).await?;

        let states = list(ctx).await?;
        if TreeIndex::new(&states).would_create_cycle(node.id, target.id) {
            return Err(AppError::BadRequest(format!(
                "Moving {} under {} would create a cycle",
                node.name, target.name
            )));
        }

        if let Some(mut old_parent) = find(ctx, &node.parent_node).await? {
            old_parent.children_ids.retain(|c| *c != node.id);
            ctx.store.update_tree_state(&old_parent).await?;
        }

        // Re-read: the new parent may be the one just updated
        let mut parent = require(ctx, &request.parent_node).await?;
        let at = request
            .index
            .unwrap_or(parent.children_ids.len())
            .min(parent.children_ids.len());
        parent.children_ids.insert(at, node.id);
        ctx.store.update_tree_state(&parent).await?;

        node.parent_node = parent.name.clone();
        node.content = with_parent(node.content, &parent.name);
        ctx.store.update_tree_state(&node).await?;
    }
    Ok(())
}
