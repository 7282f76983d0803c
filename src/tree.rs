//! Component-tree algorithms over id-linked [`TreeState`] nodes.
//!
//! Nodes reference children by integer id and their parent by display name.
//! Every traversal carries a visited set, so a corrupted graph terminates.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::{TreeState, ROOT_DISPLAY_NAME};

/// Lookup over the nodes of one (app, version, state type)
pub struct TreeIndex<'a> {
    by_id: HashMap<i64, &'a TreeState>,
    by_name: HashMap<&'a str, &'a TreeState>,
}

impl<'a> TreeIndex<'a> {
    pub fn new(states: &'a [TreeState]) -> Self {
        let mut by_id = HashMap::with_capacity(states.len());
        let mut by_name = HashMap::with_capacity(states.len());
        for state in states {
            by_id.insert(state.id, state);
            by_name.insert(state.name.as_str(), state);
        }
        Self { by_id, by_name }
    }

    pub fn get(&self, id: i64) -> Option<&'a TreeState> {
        self.by_id.get(&id).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&'a TreeState> {
        self.by_name.get(name).copied()
    }

    /// Ids of `root_id` and everything reachable below it, pre-order
    pub fn subtree_ids(&self, root_id: i64) -> Vec<i64> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root_id];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(node) = self.get(id) {
                for child in node.children_ids.iter().rev() {
                    if !visited.contains(child) {
                        stack.push(*child);
                    }
                }
            }
        }
        order
    }

    /// Whether hanging `node_id` under `new_parent_id` would close a loop
    pub fn would_create_cycle(&self, node_id: i64, new_parent_id: i64) -> bool {
        node_id == new_parent_id || self.subtree_ids(node_id).contains(&new_parent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    NoRoot,
    MultipleRoots(Vec<String>),
    RootMisnamed(String),
    DanglingChild { parent: String, child_id: i64 },
    Cycle(String),
    Unreachable(String),
}

/// Verify the structural invariants of a single tree
pub fn check_integrity(states: &[TreeState]) -> std::result::Result<(), TreeViolation> {
    if states.is_empty() {
        return Ok(());
    }
    let index = TreeIndex::new(states);

    let roots: Vec<&TreeState> = states.iter().filter(|s| s.parent_node.is_empty()).collect();
    let root = match roots.as_slice() {
        [] => return Err(TreeViolation::NoRoot),
        [root] => *root,
        many => {
            return Err(TreeViolation::MultipleRoots(
                many.iter().map(|s| s.name.clone()).collect(),
            ))
        }
    };
    if root.name != ROOT_DISPLAY_NAME {
        return Err(TreeViolation::RootMisnamed(root.name.clone()));
    }

    for state in states {
        for child in &state.children_ids {
            if index.get(*child).is_none() {
                return Err(TreeViolation::DanglingChild {
                    parent: state.name.clone(),
                    child_id: *child,
                });
            }
        }
    }

    // Depth-first with an on-path marker set
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    let mut stack = vec![(root.id, false)];
    while let Some((id, leaving)) = stack.pop() {
        if leaving {
            on_path.remove(&id);
            continue;
        }
        if on_path.contains(&id) {
            let name = index.get(id).map(|s| s.name.clone()).unwrap_or_default();
            return Err(TreeViolation::Cycle(name));
        }
        if !visited.insert(id) {
            continue;
        }
        on_path.insert(id);
        stack.push((id, true));
        if let Some(node) = index.get(id) {
            for child in node.children_ids.iter().rev() {
                if on_path.contains(child) {
                    return Err(TreeViolation::Cycle(node.name.clone()));
                }
                stack.push((*child, false));
            }
        }
    }

    if let Some(orphan) = states.iter().find(|s| !visited.contains(&s.id)) {
        return Err(TreeViolation::Unreachable(orphan.name.clone()));
    }
    Ok(())
}

/// Canonical, id-free view of a tree: name -> (parent, child names, content)
pub type TreeShape = BTreeMap<String, (String, Vec<String>, Value)>;

/// Describe a tree by display names so versions can be compared node for node
pub fn shape(states: &[TreeState]) -> TreeShape {
    let index = TreeIndex::new(states);
    states
        .iter()
        .map(|s| {
            let children = s
                .children_ids
                .iter()
                .filter_map(|c| index.get(*c).map(|n| n.name.clone()))
                .collect();
            (s.name.clone(), (s.parent_node.clone(), children, s.content.clone()))
        })
        .collect()
}

/// A serialized component subtree as carried by tree signals
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentNode {
    pub display_name: String,
    pub parent_node: String,
    /// The node object without its `childrenNode` list
    pub content: Value,
    pub children: Vec<ComponentNode>,
}

impl ComponentNode {
    /// Parse `{displayName, parentNode?, childrenNode?, ...}`
    pub fn parse(value: &Value) -> Result<Self> {
        Self::parse_with_parent(value, None)
    }

    fn parse_with_parent(value: &Value, inherited_parent: Option<&str>) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| AppError::BadRequest("Component must be an object".to_string()))?;
        let display_name = object
            .get("displayName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("Component is missing displayName".to_string()))?
            .to_string();

        let parent_node = match inherited_parent {
            Some(parent) => parent.to_string(),
            None => match object.get("parentNode").and_then(Value::as_str) {
                Some(p) if !p.is_empty() => p.to_string(),
                _ if display_name == ROOT_DISPLAY_NAME => String::new(),
                _ => ROOT_DISPLAY_NAME.to_string(),
            },
        };

        let children = match object.get("childrenNode") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|child| Self::parse_with_parent(child, Some(&display_name)))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(AppError::BadRequest(
                    "childrenNode must be an array".to_string(),
                ))
            }
        };

        let mut content: Map<String, Value> = object.clone();
        content.remove("childrenNode");
        content.insert("parentNode".to_string(), Value::String(parent_node.clone()));

        Ok(Self {
            display_name,
            parent_node,
            content: Value::Object(content),
            children,
        })
    }

    /// Number of nodes in this subtree
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(ComponentNode::len).sum::<usize>()
    }
}
