//! The hub: a single dispatcher that owns every session and room
//!
//! Sessions and HTTP handlers talk to the dispatcher only through
//! [`HubHandle`]. The dispatcher consumes registrations, unregistrations,
//! inbound frames and control commands one at a time, so room state and store
//! mutations are applied in one total order without locks.

mod broadcast;
mod signals;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::auth::TokenValidator;
use crate::config::HubConfig;
use crate::error::{AppError, Result};
use crate::models::{App, AppSnapshot, TriggerMode, UserInfo};
use crate::room::{RoomKey, RoomRegistry};
use crate::session::{SessionHandle, SessionKind};
use crate::snapshot::SnapshotEngine;
use crate::store::StateStore;

use broadcast::Scope;

/// A session announcing itself to the dispatcher
#[derive(Debug)]
pub struct Registration {
    pub handle: SessionHandle,
    /// Known up front for binary sessions, which authenticate at upgrade
    pub user: Option<UserInfo>,
}

/// Control operations submitted by the HTTP surface
#[derive(Debug)]
pub enum HubCommand {
    RecoverSnapshot {
        team_id: i64,
        app_id: i64,
        snapshot_id: i64,
        user_id: i64,
        reply: oneshot::Sender<Result<AppSnapshot>>,
    },
    TakeSnapshot {
        team_id: i64,
        app_id: i64,
        reply: oneshot::Sender<Result<AppSnapshot>>,
    },
    Deploy {
        team_id: i64,
        app_id: i64,
        reply: oneshot::Sender<Result<App>>,
    },
    ForceRefresh {
        team_id: i64,
        app_id: i64,
        reply: oneshot::Sender<usize>,
    },
}

fn hub_gone<T>(_: T) -> AppError {
    AppError::Internal("Hub dispatcher is not running".to_string())
}

/// Cloneable sending side of the dispatcher
#[derive(Clone)]
pub struct HubHandle {
    register_text: mpsc::Sender<Registration>,
    register_binary: mpsc::Sender<Registration>,
    unregister: mpsc::Sender<Uuid>,
    inbound_text: mpsc::Sender<(Uuid, String)>,
    inbound_binary: mpsc::Sender<(Uuid, Vec<u8>)>,
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(&self, handle: SessionHandle, user: Option<UserInfo>) -> Result<()> {
        let channel = match handle.kind {
            SessionKind::Text => &self.register_text,
            SessionKind::Binary => &self.register_binary,
        };
        channel
            .send(Registration { handle, user })
            .await
            .map_err(hub_gone)
    }

    pub async fn unregister(&self, session_id: Uuid) -> Result<()> {
        self.unregister.send(session_id).await.map_err(hub_gone)
    }

    pub async fn inbound_text(&self, session_id: Uuid, text: String) -> Result<()> {
        self.inbound_text
            .send((session_id, text))
            .await
            .map_err(hub_gone)
    }

    pub async fn inbound_binary(&self, session_id: Uuid, bytes: Vec<u8>) -> Result<()> {
        self.inbound_binary
            .send((session_id, bytes))
            .await
            .map_err(hub_gone)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(build(reply)).await.map_err(hub_gone)?;
        response.await.map_err(hub_gone)
    }

    /// Restore a snapshot into the edit version and refresh the room
    pub async fn recover_snapshot(
        &self,
        team_id: i64,
        app_id: i64,
        snapshot_id: i64,
        user_id: i64,
    ) -> Result<AppSnapshot> {
        self.request(|reply| HubCommand::RecoverSnapshot {
            team_id,
            app_id,
            snapshot_id,
            user_id,
            reply,
        })
        .await?
    }

    pub async fn take_snapshot(&self, team_id: i64, app_id: i64) -> Result<AppSnapshot> {
        self.request(|reply| HubCommand::TakeSnapshot {
            team_id,
            app_id,
            reply,
        })
        .await?
    }

    pub async fn deploy(&self, team_id: i64, app_id: i64) -> Result<App> {
        self.request(|reply| HubCommand::Deploy {
            team_id,
            app_id,
            reply,
        })
        .await?
    }

    /// Tell every session of an app room to reload; returns the number reached
    pub async fn force_refresh(&self, team_id: i64, app_id: i64) -> Result<usize> {
        self.request(|reply| HubCommand::ForceRefresh {
            team_id,
            app_id,
            reply,
        })
        .await
    }
}

struct Inbox {
    register_text: mpsc::Receiver<Registration>,
    register_binary: mpsc::Receiver<Registration>,
    unregister: mpsc::Receiver<Uuid>,
    inbound_text: mpsc::Receiver<(Uuid, String)>,
    inbound_binary: mpsc::Receiver<(Uuid, Vec<u8>)>,
    commands: mpsc::Receiver<HubCommand>,
}

/// Dispatcher-side view of one session
struct Client {
    handle: SessionHandle,
    user: Option<UserInfo>,
    entered: bool,
}

impl Client {
    fn room(&self) -> RoomKey {
        RoomKey::new(self.handle.team_id, self.handle.app_id)
    }

    fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// State owned by the dispatcher task
struct Dispatcher {
    store: Arc<dyn StateStore>,
    validator: Arc<dyn TokenValidator>,
    engine: SnapshotEngine,
    clients: HashMap<Uuid, Client>,
    rooms: RoomRegistry,
}

pub struct Hub {
    inbox: Inbox,
    dispatcher: Dispatcher,
}

impl Hub {
    pub fn new(
        store: Arc<dyn StateStore>,
        validator: Arc<dyn TokenValidator>,
        config: &HubConfig,
    ) -> (Self, HubHandle) {
        let capacity = config.inbound_capacity;
        let (register_text_tx, register_text) = mpsc::channel(capacity);
        let (register_binary_tx, register_binary) = mpsc::channel(capacity);
        let (unregister_tx, unregister) = mpsc::channel(capacity);
        let (inbound_text_tx, inbound_text) = mpsc::channel(capacity);
        let (inbound_binary_tx, inbound_binary) = mpsc::channel(capacity);
        let (commands_tx, commands) = mpsc::channel(capacity);

        let handle = HubHandle {
            register_text: register_text_tx,
            register_binary: register_binary_tx,
            unregister: unregister_tx,
            inbound_text: inbound_text_tx,
            inbound_binary: inbound_binary_tx,
            commands: commands_tx,
        };
        let hub = Self {
            inbox: Inbox {
                register_text,
                register_binary,
                unregister,
                inbound_text,
                inbound_binary,
                commands,
            },
            dispatcher: Dispatcher {
                engine: SnapshotEngine::new(store.clone(), config.archive_period),
                store,
                validator,
                clients: HashMap::new(),
                rooms: RoomRegistry::new(),
            },
        };
        (hub, handle)
    }

    /// Start the dispatcher on the runtime
    pub fn spawn(
        store: Arc<dyn StateStore>,
        validator: Arc<dyn TokenValidator>,
        config: &HubConfig,
    ) -> HubHandle {
        let (hub, handle) = Self::new(store, validator, config);
        tokio::spawn(hub.run());
        handle
    }

    /// Process events until every handle is dropped
    pub async fn run(self) {
        let Hub {
            mut inbox,
            mut dispatcher,
        } = self;
        tracing::info!("Hub dispatcher started");

        loop {
            // Registrations first so a session is known before its frames
            tokio::select! {
                biased;
                Some(registration) = inbox.register_text.recv() => dispatcher.register(registration),
                Some(registration) = inbox.register_binary.recv() => dispatcher.register(registration),
                Some((id, text)) = inbox.inbound_text.recv() => dispatcher.on_text(id, text).await,
                Some((id, bytes)) = inbox.inbound_binary.recv() => dispatcher.on_binary(id, bytes),
                Some(command) = inbox.commands.recv() => dispatcher.on_command(command).await,
                Some(id) = inbox.unregister.recv() => dispatcher.remove_session(id),
                else => break,
            }
            dispatcher.sweep_dead();
        }

        tracing::info!("Hub dispatcher stopped");
    }
}

impl Dispatcher {
    fn register(&mut self, registration: Registration) {
        let Registration { handle, user } = registration;
        let id = handle.id;
        let key = RoomKey::new(handle.team_id, handle.app_id);
        let kind = handle.kind;

        // Binary sessions carry no presence; they join the room's fan-out directly
        let entered = kind == SessionKind::Binary;
        if entered {
            self.rooms.room_mut(key).add_session(id);
        }
        self.clients.insert(
            id,
            Client {
                handle,
                user,
                entered,
            },
        );
        tracing::debug!(
            session = %id,
            kind = kind.as_str(),
            team_id = key.team_id,
            app_id = key.app_id,
            "Registered session"
        );
    }

    fn remove_session(&mut self, id: Uuid) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        client.handle.mark_dead();
        let key = client.room();
        if let Some(room) = self.rooms.get_mut(key) {
            room.remove_session(id);
        }
        if client.entered && client.handle.kind == SessionKind::Text {
            if let Some(user_id) = client.user_id() {
                self.depart(key, user_id, id);
            }
        }
        self.rooms.reap(key);
        tracing::debug!(session = %id, "Removed session");
    }

    /// Remove every session whose dead flag was raised
    fn sweep_dead(&mut self) {
        loop {
            let dead: Vec<Uuid> = self
                .clients
                .iter()
                .filter(|(_, c)| c.handle.is_dead())
                .map(|(id, _)| *id)
                .collect();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                tracing::warn!(session = %id, "Dropping dead session");
                self.remove_session(id);
            }
        }
    }

    /// Whether `user_id` still has an entered text session in the room
    fn has_other_session(&self, key: RoomKey, user_id: i64, except: Uuid) -> bool {
        self.clients.values().any(|c| {
            c.handle.id != except
                && c.entered
                && c.handle.kind == SessionKind::Text
                && c.room() == key
                && c.user_id() == Some(user_id)
        })
    }

    async fn on_command(&mut self, command: HubCommand) {
        let now = Utc::now();
        match command {
            HubCommand::RecoverSnapshot {
                team_id,
                app_id,
                snapshot_id,
                user_id,
                reply,
            } => {
                let result = self
                    .engine
                    .recover(team_id, app_id, snapshot_id, user_id, now)
                    .await;
                match &result {
                    Ok(_) => {
                        let reached = self.force_refresh(RoomKey::new(team_id, app_id));
                        tracing::info!(team_id, app_id, reached, "Force refresh after recovery");
                    }
                    Err(e) => tracing::warn!(team_id, app_id, snapshot_id, "Recovery failed: {}", e),
                }
                let _ = reply.send(result);
            }
            HubCommand::TakeSnapshot {
                team_id,
                app_id,
                reply,
            } => {
                let result = self
                    .engine
                    .archive(team_id, app_id, TriggerMode::Manual, now)
                    .await;
                let _ = reply.send(result);
            }
            HubCommand::Deploy {
                team_id,
                app_id,
                reply,
            } => {
                let result = self.engine.publish(team_id, app_id, now).await;
                let _ = reply.send(result);
            }
            HubCommand::ForceRefresh {
                team_id,
                app_id,
                reply,
            } => {
                let reached = self.force_refresh(RoomKey::new(team_id, app_id));
                let _ = reply.send(reached);
            }
        }
    }

    fn force_refresh(&self, key: RoomKey) -> usize {
        self.send(Scope::Room(key), &crate::protocol::Feedback::force_refresh())
    }
}
