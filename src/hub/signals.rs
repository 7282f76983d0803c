//! Routing of inbound frames to their handlers

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::broadcast::Scope;
use super::Dispatcher;
use crate::error::{AppError, Result};
use crate::handlers::{self, StateContext};
use crate::ids::encode_id;
use crate::models::{App, ModifyHistory, ModifyOperation, StateType, UserInfo, DASHBOARD_APP_ID};
use crate::protocol::{
    BinaryFrame, Broadcast, BroadcastType, ErrorCode, Feedback, InboundFrame, Signal,
};
use crate::room::RoomKey;
use crate::session::SessionKind;

impl Dispatcher {
    fn reply(&self, id: Uuid, feedback: Feedback) {
        self.send(Scope::Session(id), &feedback);
    }

    pub(super) async fn on_text(&mut self, id: Uuid, text: String) {
        match self.clients.get(&id) {
            Some(client) if client.handle.kind == SessionKind::Text => {}
            _ => {
                tracing::debug!(session = %id, "Text frame from unknown session");
                return;
            }
        }

        let frame = match InboundFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session = %id, "Dropping malformed frame: {}", e);
                self.reply(id, Feedback::error(ErrorCode::Failed, format!("Invalid frame: {}", e)));
                return;
            }
        };
        tracing::debug!(
            session = %id,
            signal = frame.signal.as_str(),
            target = frame.target.as_str(),
            "Routing frame"
        );

        match frame.signal {
            Signal::Ping => self.reply(id, Feedback::pong()),
            Signal::Enter => self.on_enter(id, &frame).await,
            signal => {
                let (user, key) = match self.admitted(id) {
                    Ok(admitted) => admitted,
                    Err(code) => {
                        self.reply(id, Feedback::error(code, "Enter the room first"));
                        return;
                    }
                };
                match signal {
                    Signal::Leave => self.on_leave(id, &user, key),
                    Signal::CooperateAttach => self.on_attach(id, &user, key, &frame, true),
                    Signal::CooperateDisattach => self.on_attach(id, &user, key, &frame, false),
                    Signal::BroadcastOnly => {
                        self.send(
                            Scope::OthersInRoom { key, except: id },
                            &Feedback::broadcast(frame.relay_envelope()),
                        );
                    }
                    Signal::GlobalBroadcastOnly => {
                        self.send(
                            Scope::Team {
                                team_id: key.team_id,
                                except: Some(id),
                            },
                            &Feedback::broadcast(frame.relay_envelope()),
                        );
                    }
                    _ => self.on_state(id, &user, key, &frame).await,
                }
            }
        }
    }

    /// The sender's identity and room, or the code explaining why it has none
    fn admitted(&self, id: Uuid) -> std::result::Result<(UserInfo, RoomKey), ErrorCode> {
        let client = self.clients.get(&id).ok_or(ErrorCode::LoginFailed)?;
        let user = client.user.clone().ok_or(ErrorCode::LoginFailed)?;
        if !client.entered {
            return Err(ErrorCode::NeedEnter);
        }
        Ok((user, client.room()))
    }

    async fn on_enter(&mut self, id: Uuid, frame: &InboundFrame) {
        let token = frame
            .payload
            .first()
            .and_then(|p| p.get("authToken"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let user = match self.validator.authenticate(token).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(session = %id, "Login failed: {}", e);
                self.reply(id, Feedback::error(ErrorCode::LoginFailed, e.to_string()));
                return;
            }
        };

        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.user = Some(user.clone());
        client.entered = true;
        let key = client.room();

        let room = self.rooms.room_mut(key);
        room.add_session(id);
        room.enter(user.clone());
        tracing::info!(
            session = %id,
            user_id = user.id,
            team_id = key.team_id,
            app_id = key.app_id,
            "User entered room"
        );

        if key.app_id != DASHBOARD_APP_ID {
            let now = Utc::now();
            if let Err(e) = self.record_editor(key, &user, now).await {
                tracing::warn!(app_id = key.app_id, "Failed to record editor: {}", e);
            }
            if let Err(e) = self.engine.ensure_active(key.team_id, key.app_id, now).await {
                tracing::warn!(app_id = key.app_id, "Failed to prepare active snapshot: {}", e);
                self.reply(
                    id,
                    Feedback::error(ErrorCode::CreateSnapshotModifyHistoryFailed, e.to_string()),
                );
            }
        }

        self.broadcast_presence(key, BroadcastType::Enter);
    }

    fn on_leave(&mut self, id: Uuid, user: &UserInfo, key: RoomKey) {
        let notified = self.depart(key, user.id, id);
        if !notified {
            self.reply(id, Feedback::ok());
        }
        if let Some(client) = self.clients.get_mut(&id) {
            client.entered = false;
        }
        if let Some(room) = self.rooms.get_mut(key) {
            room.remove_session(id);
        }
        self.rooms.reap(key);
    }

    /// Drop a user's presence unless another of their sessions remains.
    /// Returns whether the room was notified.
    pub(super) fn depart(&mut self, key: RoomKey, user_id: i64, session: Uuid) -> bool {
        if self.has_other_session(key, user_id, session) {
            return false;
        }
        let Some(room) = self.rooms.get_mut(key) else {
            return false;
        };
        let held = room.holds_attachments(user_id);
        if !room.leave(user_id) {
            return false;
        }
        tracing::info!(user_id, team_id = key.team_id, app_id = key.app_id, "User left room");
        self.broadcast_presence(key, BroadcastType::Leave);
        if held {
            self.broadcast_attachments(key, BroadcastType::DisattachComponent);
        }
        true
    }

    fn on_attach(&mut self, id: Uuid, user: &UserInfo, key: RoomKey, frame: &InboundFrame, attach: bool) {
        let names = match handlers::as_strings(&frame.payload, "Component name") {
            Ok(names) => names,
            Err(e) => {
                self.reply(id, Feedback::error(ErrorCode::Failed, e.to_string()));
                return;
            }
        };
        let room = self.rooms.room_mut(key);
        let kind = if attach {
            room.attach(user.id, &names);
            BroadcastType::AttachComponent
        } else {
            room.detach(user.id, &names);
            BroadcastType::DisattachComponent
        };
        self.broadcast_attachments(key, kind);
    }

    fn broadcast_presence(&self, key: RoomKey, kind: BroadcastType) {
        let Some(room) = self.rooms.get(key) else {
            return;
        };
        let view = serde_json::to_value(room.view()).unwrap_or_default();
        self.send(Scope::Room(key), &Feedback::broadcast(Broadcast::server(kind, view)));
    }

    fn broadcast_attachments(&self, key: RoomKey, kind: BroadcastType) {
        let Some(room) = self.rooms.get(key) else {
            return;
        };
        let attached = serde_json::to_value(room.attached()).unwrap_or_default();
        self.send(Scope::Room(key), &Feedback::broadcast(Broadcast::server(kind, attached)));
    }

    async fn on_state(&mut self, id: Uuid, user: &UserInfo, key: RoomKey, frame: &InboundFrame) {
        let envelope = frame.relay_envelope();
        let others = Scope::OthersInRoom { key, except: id };

        if frame.target.is_broadcast_only() {
            self.send(others, &Feedback::broadcast(envelope));
            return;
        }
        let failed = frame.signal.failure_code();
        if key.app_id == DASHBOARD_APP_ID {
            self.reply(id, Feedback::error(failed, "Dashboard rooms carry no state"));
            return;
        }
        let Some(state_type) = StateType::from_target(frame.target) else {
            let message = format!("Target {} carries no state", frame.target.as_str());
            self.reply(id, Feedback::error(failed, message));
            return;
        };

        let ctx = StateContext {
            store: self.store.as_ref(),
            team_id: key.team_id,
            app_id: key.app_id,
            state_type,
        };
        if let Err(e) = handlers::apply(&ctx, frame.signal, &frame.payload).await {
            tracing::warn!(
                session = %id,
                signal = frame.signal.as_str(),
                target = frame.target.as_str(),
                "State mutation failed: {}",
                e
            );
            let code = handlers::failure_code(frame.signal, state_type.family());
            self.reply(id, Feedback::error(code, e.to_string()));
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.touch_app(key, now).await {
            tracing::warn!(app_id = key.app_id, "Failed to bump updatedAt: {}", e);
        }
        if frame.wants_room_broadcast() {
            self.send(others, &Feedback::broadcast(envelope.clone()));
        }

        let Some(operation) = ModifyOperation::from_signal(frame.signal) else {
            return;
        };
        let entry = ModifyHistory {
            operation,
            operation_target: frame.target,
            operation_target_name: handlers::target_name(&frame.payload),
            broadcast_type: envelope.kind,
            broadcast_payload: envelope.payload,
            modified_by: user.id,
            modified_at: now,
            recovered_from: None,
        };
        if let Err(e) = self.engine.ensure_active(key.team_id, key.app_id, now).await {
            tracing::warn!(app_id = key.app_id, "Failed to create active snapshot: {}", e);
            self.reply(
                id,
                Feedback::error(ErrorCode::CreateSnapshotModifyHistoryFailed, e.to_string()),
            );
            return;
        }
        if let Err(e) = self.engine.record_history(key.team_id, key.app_id, entry).await {
            tracing::warn!(app_id = key.app_id, "Failed to record modify history: {}", e);
            self.reply(
                id,
                Feedback::error(ErrorCode::UpdateSnapshotModifyHistoryFailed, e.to_string()),
            );
            return;
        }
        if let Err(e) = self.engine.maybe_archive(key.team_id, key.app_id, now).await {
            tracing::error!(app_id = key.app_id, "Archival failed: {}", e);
            self.reply(
                id,
                Feedback::error(ErrorCode::CreateSnapshotModifyHistoryFailed, e.to_string()),
            );
        }
    }

    /// Put the user at the front of the app's edited-by list, creating the app on first contact
    async fn record_editor(&self, key: RoomKey, user: &UserInfo, now: DateTime<Utc>) -> Result<()> {
        let mut app = match self.store.get_app(key.team_id, key.app_id).await {
            Ok(app) => app,
            Err(AppError::NotFound(_)) => {
                let app = App::new(key.team_id, key.app_id, format!("app-{}", encode_id(key.app_id)));
                self.store.insert_app(&app).await?;
                app
            }
            Err(e) => return Err(e),
        };
        app.record_editor(user.id, now);
        app.touch(now);
        self.store.update_app(&app).await
    }

    async fn touch_app(&self, key: RoomKey, now: DateTime<Utc>) -> Result<()> {
        let mut app = self.store.get_app(key.team_id, key.app_id).await?;
        app.touch(now);
        self.store.update_app(&app).await
    }

    pub(super) fn on_binary(&mut self, id: Uuid, bytes: Vec<u8>) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        if client.handle.kind != SessionKind::Binary {
            return;
        }
        let kind = match BinaryFrame::peek_kind(&bytes) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!(session = %id, "Dropping binary frame with bad tag: {}", e);
                return;
            }
        };
        let key = client.room();
        let user_id = client.user_id().unwrap_or_default();
        match BinaryFrame::restamp(&bytes, id, user_id) {
            Ok(stamped) => {
                tracing::trace!(session = %id, kind = ?kind, "Relaying binary frame");
                self.send_binary(Scope::OthersInRoom { key, except: id }, stamped);
            }
            Err(e) => tracing::debug!(session = %id, "Dropping malformed binary frame: {}", e),
        }
    }
}
