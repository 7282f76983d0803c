//! Data models for applications, their versioned states and snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{Signal, Target};

/// Version designating the live, mutable state editors operate on
pub const EDIT_VERSION: i64 = 0;

/// App id reserved for dashboard presence rooms
pub const DASHBOARD_APP_ID: i64 = 0;

/// Display name of the single parentless tree node
pub const ROOT_DISPLAY_NAME: &str = "root";

/// Most recent editors kept on an application
pub const EDITED_BY_LIMIT: usize = 10;

/// An application: the root entity every state hangs off
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub mainline_version: i64,
    pub release_version: i64,
    pub edited_by: Vec<EditedBy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedBy {
    pub user_id: i64,
    pub edited_at: DateTime<Utc>,
}

impl App {
    pub fn new(team_id: i64, id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            team_id,
            name: name.into(),
            mainline_version: 0,
            release_version: 0,
            edited_by: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move `user_id` to the front of the edited-by list
    pub fn record_editor(&mut self, user_id: i64, at: DateTime<Utc>) {
        self.edited_by.retain(|e| e.user_id != user_id);
        self.edited_by.insert(
            0,
            EditedBy {
                user_id,
                edited_at: at,
            },
        );
        self.edited_by.truncate(EDITED_BY_LIMIT);
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Storage family a state type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFamily {
    Tree,
    Kv,
    Set,
}

/// Type tag of a persisted state record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Components,
    Dependencies,
    DragShadow,
    DottedLineSquare,
    DisplayName,
}

impl StateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Components => "components",
            StateType::Dependencies => "dependencies",
            StateType::DragShadow => "drag_shadow",
            StateType::DottedLineSquare => "dotted_line_square",
            StateType::DisplayName => "display_name",
        }
    }

    pub fn family(&self) -> StateFamily {
        match self {
            StateType::Components => StateFamily::Tree,
            StateType::Dependencies | StateType::DragShadow | StateType::DottedLineSquare => {
                StateFamily::Kv
            }
            StateType::DisplayName => StateFamily::Set,
        }
    }

    /// The persisted state type a wire target selects, if any
    pub fn from_target(target: Target) -> Option<Self> {
        match target {
            Target::Components => Some(StateType::Components),
            Target::Dependencies => Some(StateType::Dependencies),
            Target::DragShadow => Some(StateType::DragShadow),
            Target::DottedLineSquare => Some(StateType::DottedLineSquare),
            Target::DisplayName => Some(StateType::DisplayName),
            _ => None,
        }
    }
}

impl std::str::FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "components" => Ok(StateType::Components),
            "dependencies" => Ok(StateType::Dependencies),
            "drag_shadow" => Ok(StateType::DragShadow),
            "dotted_line_square" => Ok(StateType::DottedLineSquare),
            "display_name" => Ok(StateType::DisplayName),
            _ => Err(format!("Invalid state type: {}", s)),
        }
    }
}

/// A node of the component tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeState {
    pub id: i64,
    pub state_type: StateType,
    pub team_id: i64,
    pub app_id: i64,
    pub version: i64,
    pub name: String,
    pub content: Value,
    /// Display name of the parent; empty for the root
    pub parent_node: String,
    pub children_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TreeState {
    /// A node not yet persisted; the store assigns `id`
    pub fn new(
        team_id: i64,
        app_id: i64,
        version: i64,
        name: impl Into<String>,
        parent_node: impl Into<String>,
        content: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            state_type: StateType::Components,
            team_id,
            app_id,
            version,
            name: name.into(),
            content,
            parent_node: parent_node.into(),
            children_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_node.is_empty() && self.name == ROOT_DISPLAY_NAME
    }
}

/// A keyed scalar record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvState {
    pub id: i64,
    pub state_type: StateType,
    pub team_id: i64,
    pub app_id: i64,
    pub version: i64,
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KvState {
    pub fn new(
        state_type: StateType,
        team_id: i64,
        app_id: i64,
        version: i64,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            state_type,
            team_id,
            app_id,
            version,
            key: key.into(),
            value,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A membership record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetState {
    pub id: i64,
    pub state_type: StateType,
    pub team_id: i64,
    pub app_id: i64,
    pub version: i64,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SetState {
    pub fn new(
        state_type: StateType,
        team_id: i64,
        app_id: i64,
        version: i64,
        value: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            state_type,
            team_id,
            app_id,
            version,
            value: value.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A server-executable recipe attached to an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: i64,
    pub team_id: i64,
    pub app_id: i64,
    pub version: i64,
    pub resource_id: i64,
    pub name: String,
    pub action_type: String,
    pub template: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(
        team_id: i64,
        app_id: i64,
        version: i64,
        name: impl Into<String>,
        action_type: impl Into<String>,
        template: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            team_id,
            app_id,
            version,
            resource_id: 0,
            name: name.into(),
            action_type: action_type.into(),
            template,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What caused a snapshot to be archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Auto,
    Manual,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Auto => "auto",
            TriggerMode::Manual => "manual",
        }
    }
}

impl std::str::FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(TriggerMode::Auto),
            "manual" => Ok(TriggerMode::Manual),
            _ => Err(format!("Invalid trigger mode: {}", s)),
        }
    }
}

/// Operation recorded in a modify-history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOperation {
    CreateState,
    DeleteState,
    UpdateState,
    MoveState,
    CreateOrUpdateState,
    PutState,
    RecoverSnapshot,
}

impl ModifyOperation {
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::CreateState => Some(ModifyOperation::CreateState),
            Signal::DeleteState => Some(ModifyOperation::DeleteState),
            Signal::UpdateState => Some(ModifyOperation::UpdateState),
            Signal::MoveState => Some(ModifyOperation::MoveState),
            Signal::CreateOrUpdateState => Some(ModifyOperation::CreateOrUpdateState),
            Signal::PutState => Some(ModifyOperation::PutState),
            _ => None,
        }
    }
}

/// One entry of a snapshot's sliding modification window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyHistory {
    pub operation: ModifyOperation,
    pub operation_target: Target,
    pub operation_target_name: String,
    pub broadcast_type: String,
    pub broadcast_payload: Value,
    pub modified_by: i64,
    pub modified_at: DateTime<Utc>,
    /// Creation time of the snapshot a recovery restored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_from: Option<DateTime<Utc>>,
}

/// An immutable record of an application at a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    pub id: i64,
    pub team_id: i64,
    pub app_id: i64,
    pub target_version: i64,
    pub trigger_mode: TriggerMode,
    pub modify_history: Vec<ModifyHistory>,
    pub created_at: DateTime<Utc>,
}

impl AppSnapshot {
    /// A fresh active snapshot (targets the edit version)
    pub fn active(team_id: i64, app_id: i64, trigger_mode: TriggerMode, at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            team_id,
            app_id,
            target_version: EDIT_VERSION,
            trigger_mode,
            modify_history: Vec::new(),
            created_at: at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.target_version == EDIT_VERSION
    }
}

/// Public identity of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub uid: String,
    pub nickname: String,
    pub avatar: String,
}

/// Request to restore a snapshot into the edit version
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSnapshotRequest {
    #[serde(rename = "snapshotID")]
    pub snapshot_id: String,
}

/// All records of one application version
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionContents {
    pub version: i64,
    pub tree_states: Vec<TreeState>,
    pub kv_states: Vec<KvState>,
    pub set_states: Vec<SetState>,
    pub actions: Vec<Action>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_type_round_trip_str() {
        for st in [
            StateType::Components,
            StateType::Dependencies,
            StateType::DragShadow,
            StateType::DottedLineSquare,
            StateType::DisplayName,
        ] {
            assert_eq!(st.as_str().parse::<StateType>().unwrap(), st);
        }
        assert!("bogus".parse::<StateType>().is_err());
    }

    #[test]
    fn test_state_type_family() {
        assert_eq!(StateType::Components.family(), StateFamily::Tree);
        assert_eq!(StateType::DragShadow.family(), StateFamily::Kv);
        assert_eq!(StateType::DisplayName.family(), StateFamily::Set);
    }

    #[test]
    fn test_from_target() {
        assert_eq!(
            StateType::from_target(Target::Dependencies),
            Some(StateType::Dependencies)
        );
        assert_eq!(StateType::from_target(Target::Window), None);
    }

    #[test]
    fn test_record_editor_dedupes_and_bounds() {
        let mut app = App::new(1, 2, "demo");
        let now = Utc::now();
        for user in 0..12 {
            app.record_editor(user, now);
        }
        app.record_editor(5, now);
        assert_eq!(app.edited_by.len(), EDITED_BY_LIMIT);
        assert_eq!(app.edited_by[0].user_id, 5);
        assert_eq!(app.edited_by.iter().filter(|e| e.user_id == 5).count(), 1);
    }

    #[test]
    fn test_trigger_mode_from_str() {
        assert_eq!("manual".parse::<TriggerMode>().unwrap(), TriggerMode::Manual);
        assert!("weekly".parse::<TriggerMode>().is_err());
    }

    #[test]
    fn test_modify_operation_from_signal() {
        assert_eq!(
            ModifyOperation::from_signal(Signal::PutState),
            Some(ModifyOperation::PutState)
        );
        assert_eq!(ModifyOperation::from_signal(Signal::Ping), None);
    }

    #[test]
    fn test_tree_root_detection() {
        let root = TreeState::new(1, 1, 0, ROOT_DISPLAY_NAME, "", Value::Null);
        assert!(root.is_root());
        let child = TreeState::new(1, 1, 0, "btn1", ROOT_DISPLAY_NAME, Value::Null);
        assert!(!child.is_root());
    }
}
