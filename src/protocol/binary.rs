//! Binary frames for live drag and cursor motion.
//!
//! Wire format, one logical message per websocket frame:
//! ```text
//! ┌──────────┬──────────────┬─────────────────────┐
//! │ kind     │ payload len  │ payload (bincode)   │
//! │ 1 byte   │ 4 bytes BE   │ variable            │
//! └──────────┴──────────────┴─────────────────────┘
//! ```
//!
//! The dispatcher only peeks the kind byte to route; the payload is decoded
//! just long enough to stamp the sender's identity before fan-out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProtocolError;

const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryKind {
    MovingState = 1,
    Cursor = 2,
}

impl TryFrom<u8> for BinaryKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BinaryKind::MovingState),
            2 => Ok(BinaryKind::Cursor),
            other => Err(ProtocolError::UnknownTag {
                kind: "BinaryKind",
                value: i32::from(other),
            }),
        }
    }
}

/// A component being dragged across the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingState {
    /// Server-assigned session identity
    pub client_id: u128,
    pub user_id: i64,
    pub display_names: Vec<String>,
    pub status: u8,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A peer's pointer position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Server-assigned session identity
    pub client_id: u128,
    pub user_id: i64,
    /// Component the cursor is over, empty for the bare canvas
    pub display_name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryFrame {
    Moving(MovingState),
    Cursor(CursorPosition),
}

impl BinaryFrame {
    pub fn kind(&self) -> BinaryKind {
        match self {
            BinaryFrame::Moving(_) => BinaryKind::MovingState,
            BinaryFrame::Cursor(_) => BinaryKind::Cursor,
        }
    }

    /// Read the discriminator without decoding the payload
    pub fn peek_kind(bytes: &[u8]) -> Result<BinaryKind, ProtocolError> {
        match bytes.first() {
            Some(tag) => BinaryKind::try_from(*tag),
            None => Err(ProtocolError::Truncated(0)),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated(bytes.len()));
        }
        let kind = BinaryKind::try_from(bytes[0])?;
        let declared = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let body = &bytes[HEADER_LEN..];
        if body.len() != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        let config = bincode::config::standard();
        let frame = match kind {
            BinaryKind::MovingState => {
                let (state, _) = bincode::serde::decode_from_slice(body, config)
                    .map_err(|e| ProtocolError::Codec(e.to_string()))?;
                BinaryFrame::Moving(state)
            }
            BinaryKind::Cursor => {
                let (cursor, _) = bincode::serde::decode_from_slice(body, config)
                    .map_err(|e| ProtocolError::Codec(e.to_string()))?;
                BinaryFrame::Cursor(cursor)
            }
        };
        Ok(frame)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let config = bincode::config::standard();
        let body = match self {
            BinaryFrame::Moving(state) => bincode::serde::encode_to_vec(state, config),
            BinaryFrame::Cursor(cursor) => bincode::serde::encode_to_vec(cursor, config),
        }
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;

        let len = u32::try_from(body.len())
            .map_err(|_| ProtocolError::Codec(format!("payload too large: {}", body.len())))?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(self.kind() as u8);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Overwrite the identity fields so peers can attribute the motion
    pub fn stamp(&mut self, client_id: Uuid, user_id: i64) {
        match self {
            BinaryFrame::Moving(state) => {
                state.client_id = client_id.as_u128();
                state.user_id = user_id;
            }
            BinaryFrame::Cursor(cursor) => {
                cursor.client_id = client_id.as_u128();
                cursor.user_id = user_id;
            }
        }
    }

    /// Decode, stamp and re-encode an inbound frame for fan-out
    pub fn restamp(bytes: &[u8], client_id: Uuid, user_id: i64) -> Result<Vec<u8>, ProtocolError> {
        let mut frame = Self::decode(bytes)?;
        frame.stamp(client_id, user_id);
        frame.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> BinaryFrame {
        BinaryFrame::Cursor(CursorPosition {
            client_id: 0,
            user_id: 0,
            display_name: "btn1".to_string(),
            x: 10.5,
            y: 20.0,
        })
    }

    #[test]
    fn test_peek_kind() {
        let bytes = cursor().encode().unwrap();
        assert_eq!(BinaryFrame::peek_kind(&bytes).unwrap(), BinaryKind::Cursor);
        assert!(BinaryFrame::peek_kind(&[]).is_err());
        assert!(BinaryFrame::peek_kind(&[9]).is_err());
    }

    #[test]
    fn test_restamp_overwrites_identity() {
        let bytes = cursor().encode().unwrap();
        let client = Uuid::new_v4();
        let out = BinaryFrame::restamp(&bytes, client, 77).unwrap();

        match BinaryFrame::decode(&out).unwrap() {
            BinaryFrame::Cursor(c) => {
                assert_eq!(c.client_id, client.as_u128());
                assert_eq!(c.user_id, 77);
                assert_eq!(c.display_name, "btn1");
                assert_eq!(c.x, 10.5);
            }
            other => panic!("Expected cursor frame, got {:?}", other),
        }
    }

    #[test]
    fn test_moving_state_keeps_payload() {
        let frame = BinaryFrame::Moving(MovingState {
            client_id: 1,
            user_id: 2,
            display_names: vec!["a".into(), "b".into()],
            status: 1,
            x: 1.0,
            y: 2.0,
            width: 3.0,
            height: 4.0,
        });
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], BinaryKind::MovingState as u8);
        assert_eq!(BinaryFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            BinaryFrame::decode(&[1, 0, 0]),
            Err(ProtocolError::Truncated(3))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut bytes = cursor().encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            BinaryFrame::decode(&bytes),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }
}
