//! Fan-out of outbound frames
//!
//! A frame is serialized once and every recipient's queue receives a shared
//! reference to it. Pushing never waits; recipients that are dead or whose
//! queue overflows are skipped and swept by the dispatcher afterwards.

use std::sync::Arc;

use uuid::Uuid;

use super::Dispatcher;
use crate::protocol::Feedback;
use crate::room::RoomKey;
use crate::session::{Outbound, SessionKind};

/// Who receives a frame
#[derive(Debug, Clone, Copy)]
pub(super) enum Scope {
    /// One session
    Session(Uuid),
    /// Every session of the room except the originator
    OthersInRoom { key: RoomKey, except: Uuid },
    /// Every session of the room
    Room(RoomKey),
    /// Every session of every room of the team
    Team { team_id: i64, except: Option<Uuid> },
}

impl Dispatcher {
    fn recipients(&self, scope: Scope, kind: SessionKind) -> Vec<Uuid> {
        let candidates: Vec<Uuid> = match scope {
            Scope::Session(id) => vec![id],
            Scope::OthersInRoom { key, except } => self
                .rooms
                .get(key)
                .map(|room| room.sessions().filter(|id| *id != except).collect())
                .unwrap_or_default(),
            Scope::Room(key) => self
                .rooms
                .get(key)
                .map(|room| room.sessions().collect())
                .unwrap_or_default(),
            Scope::Team { team_id, except } => self
                .rooms
                .team_sessions(team_id)
                .into_iter()
                .filter(|id| Some(*id) != except)
                .collect(),
        };

        candidates
            .into_iter()
            .filter(|id| {
                self.clients
                    .get(id)
                    .is_some_and(|c| c.handle.kind == kind && !c.handle.is_dead())
            })
            .collect()
    }

    fn deliver(&self, recipients: Vec<Uuid>, frame: Outbound) -> usize {
        recipients
            .into_iter()
            .filter_map(|id| self.clients.get(&id))
            .filter(|client| client.handle.push(frame.clone()))
            .count()
    }

    /// Send a text feedback frame; returns how many sessions took it
    pub(super) fn send(&self, scope: Scope, feedback: &Feedback) -> usize {
        let recipients = self.recipients(scope, SessionKind::Text);
        if recipients.is_empty() {
            return 0;
        }
        let frame = Outbound::Text(Arc::from(feedback.encode()));
        self.deliver(recipients, frame)
    }

    pub(super) fn send_binary(&self, scope: Scope, bytes: Vec<u8>) -> usize {
        let recipients = self.recipients(scope, SessionKind::Binary);
        if recipients.is_empty() {
            return 0;
        }
        self.deliver(recipients, Outbound::Binary(Arc::from(bytes)))
    }
}
