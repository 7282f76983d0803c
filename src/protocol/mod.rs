//! Wire codec for text (structured) and binary (cursor/move) frames

pub mod binary;
pub mod text;

use thiserror::Error;

pub use binary::{BinaryFrame, BinaryKind, CursorPosition, MovingState};
pub use text::{Broadcast, BroadcastType, ErrorCode, Feedback, InboundFrame, Signal, Target};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown {kind} tag: {value}")]
    UnknownTag { kind: &'static str, value: i32 },

    #[error("Truncated binary frame: {0} bytes")]
    Truncated(usize),

    #[error("Binary frame length mismatch: header declares {declared}, body has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Binary codec error: {0}")]
    Codec(String),
}
