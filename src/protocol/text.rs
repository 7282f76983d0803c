//! Structured (JSON) frames exchanged over text sessions
//!
//! Inbound:
//! ```text
//! { "signal": int, "target": int, "option": int,
//!   "payload": [any, ...], "broadcast": {"type": str, "payload": any} | null }
//! ```
//! Outbound (feedback):
//! ```text
//! { "errorCode": int, "errorMessage": str,
//!   "broadcast": {...} | null, "data": any }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProtocolError;

/// Option bit requesting a room broadcast of the frame
pub const OPTION_BROADCAST_ROOM: i32 = 1;

macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i32", into = "i32")]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<i32> for $name {
            type Error = ProtocolError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(ProtocolError::UnknownTag {
                        kind: stringify!($name),
                        value: other,
                    }),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }
    };
}

int_enum! {
    /// Signal tag selecting the handler for an inbound frame
    pub enum Signal {
        Ping = 0,
        Enter = 1,
        Leave = 2,
        CreateState = 3,
        DeleteState = 4,
        UpdateState = 5,
        MoveState = 6,
        CreateOrUpdateState = 7,
        BroadcastOnly = 8,
        PutState = 9,
        GlobalBroadcastOnly = 10,
        CooperateAttach = 11,
        CooperateDisattach = 12,
    }
}

int_enum! {
    /// Target tag selecting the affected state family
    pub enum Target {
        Nothing = 0,
        Components = 1,
        Dependencies = 2,
        DragShadow = 3,
        DottedLineSquare = 4,
        DisplayName = 5,
        Apps = 6,
        Resource = 7,
        Action = 8,
        Cursor = 9,
        Window = 10,
        AiAgent = 11,
    }
}

int_enum! {
    /// Feedback codes; zero is the success / broadcast channel
    pub enum ErrorCode {
        Ok = 0,
        Failed = 1,
        NeedEnter = 2,
        Pong = 3,
        LoginFailed = 4,
        CreateStateFailed = 5,
        DeleteStateFailed = 6,
        UpdateStateFailed = 7,
        MoveStateFailed = 8,
        CreateOrUpdateStateFailed = 9,
        CanNotMoveKvState = 10,
        CanNotMoveSetState = 11,
        PutStateFailed = 12,
        CreateSnapshotModifyHistoryFailed = 13,
        UpdateSnapshotModifyHistoryFailed = 14,
        ForceRefreshWindow = 15,
    }
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Ping => "ping",
            Signal::Enter => "enter",
            Signal::Leave => "leave",
            Signal::CreateState => "createState",
            Signal::DeleteState => "deleteState",
            Signal::UpdateState => "updateState",
            Signal::MoveState => "moveState",
            Signal::CreateOrUpdateState => "createOrUpdateState",
            Signal::BroadcastOnly => "broadcastOnly",
            Signal::PutState => "putState",
            Signal::GlobalBroadcastOnly => "globalBroadcastOnly",
            Signal::CooperateAttach => "cooperateAttach",
            Signal::CooperateDisattach => "cooperateDisattach",
        }
    }

    /// Error code reported when this signal's store operation fails
    pub fn failure_code(&self) -> ErrorCode {
        match self {
            Signal::CreateState => ErrorCode::CreateStateFailed,
            Signal::DeleteState => ErrorCode::DeleteStateFailed,
            Signal::UpdateState => ErrorCode::UpdateStateFailed,
            Signal::MoveState => ErrorCode::MoveStateFailed,
            Signal::CreateOrUpdateState => ErrorCode::CreateOrUpdateStateFailed,
            Signal::PutState => ErrorCode::PutStateFailed,
            Signal::Enter => ErrorCode::LoginFailed,
            _ => ErrorCode::Failed,
        }
    }
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Nothing => "nothing",
            Target::Components => "components",
            Target::Dependencies => "dependencies",
            Target::DragShadow => "dragShadow",
            Target::DottedLineSquare => "dottedLineSquare",
            Target::DisplayName => "displayName",
            Target::Apps => "apps",
            Target::Resource => "resource",
            Target::Action => "action",
            Target::Cursor => "cursor",
            Target::Window => "window",
            Target::AiAgent => "aiAgent",
        }
    }

    /// Targets naming entities owned outside the hub; frames only fan out
    pub fn is_broadcast_only(&self) -> bool {
        matches!(
            self,
            Target::Apps
                | Target::Resource
                | Target::Action
                | Target::AiAgent
                | Target::Cursor
                | Target::Window
        )
    }
}

/// Broadcast type strings generated by the server itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastType {
    Enter,
    Leave,
    AttachComponent,
    DisattachComponent,
    ForceRefresh,
}

impl BroadcastType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastType::Enter => "enter/remote",
            BroadcastType::Leave => "leave/remote",
            BroadcastType::AttachComponent => "attachComponent/remote",
            BroadcastType::DisattachComponent => "disattachComponent/remote",
            BroadcastType::ForceRefresh => "forceRefresh/remote",
        }
    }
}

/// `{type, payload}` envelope relayed to peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Broadcast {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn server(kind: BroadcastType, payload: Value) -> Self {
        Self::new(kind.as_str(), payload)
    }
}

/// A decoded inbound text frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub signal: Signal,
    #[serde(default = "default_target")]
    pub target: Target,
    #[serde(default)]
    pub option: i32,
    #[serde(default)]
    pub payload: Vec<Value>,
    #[serde(default)]
    pub broadcast: Option<Broadcast>,
}

fn default_target() -> Target {
    Target::Nothing
}

impl InboundFrame {
    pub fn new(signal: Signal, target: Target, payload: Vec<Value>) -> Self {
        Self {
            signal,
            target,
            option: 0,
            payload,
            broadcast: None,
        }
    }

    pub fn with_option(mut self, option: i32) -> Self {
        self.option = option;
        self
    }

    pub fn with_broadcast(mut self, broadcast: Broadcast) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Json)
    }

    pub fn wants_room_broadcast(&self) -> bool {
        self.option & OPTION_BROADCAST_ROOM != 0
    }

    /// The envelope relayed to peers: the client's own, or one derived from the frame
    pub fn relay_envelope(&self) -> Broadcast {
        match &self.broadcast {
            Some(b) => b.clone(),
            None => Broadcast::new(
                format!("{}/{}", self.target.as_str(), self.signal.as_str()),
                Value::Array(self.payload.clone()),
            ),
        }
    }
}

/// Outbound feedback frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub broadcast: Option<Broadcast>,
    pub data: Value,
}

impl Feedback {
    pub fn ok() -> Self {
        Self {
            error_code: ErrorCode::Ok,
            error_message: String::new(),
            broadcast: None,
            data: Value::Null,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error_message: message.into(),
            broadcast: None,
            data: Value::Null,
        }
    }

    pub fn broadcast(broadcast: Broadcast) -> Self {
        Self {
            broadcast: Some(broadcast),
            ..Self::ok()
        }
    }

    pub fn pong() -> Self {
        Self::error(ErrorCode::Pong, "")
    }

    pub fn force_refresh() -> Self {
        Self {
            broadcast: Some(Broadcast::server(BroadcastType::ForceRefresh, Value::Null)),
            ..Self::error(ErrorCode::ForceRefreshWindow, "")
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn encode(&self) -> String {
        // Every field is a plain JSON value; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
