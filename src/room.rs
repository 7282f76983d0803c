//! Rooms: presence and component attachment per (team, app)
//!
//! Rooms are owned by the hub dispatcher, so nothing here locks. Views handed
//! out for broadcasting are plain copies.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::models::UserInfo;

/// Identity of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey {
    pub team_id: i64,
    pub app_id: i64,
}

impl RoomKey {
    pub fn new(team_id: i64, app_id: i64) -> Self {
        Self { team_id, app_id }
    }
}

/// Users attached to one component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub display_name: String,
    pub users: Vec<UserInfo>,
}

/// Presence and attachment snapshot of a room
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub in_room_users: Vec<UserInfo>,
    pub attached_components: Vec<AttachmentView>,
}

#[derive(Debug, Default)]
pub struct Room {
    sessions: HashSet<Uuid>,
    order: Vec<i64>,
    users: HashMap<i64, UserInfo>,
    attachments: BTreeMap<String, Vec<i64>>,
    held: HashMap<i64, Vec<String>>,
}

impl Room {
    pub fn add_session(&mut self, session_id: Uuid) {
        self.sessions.insert(session_id);
    }

    pub fn remove_session(&mut self, session_id: Uuid) -> bool {
        self.sessions.remove(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.sessions.iter().copied()
    }

    /// Insert the user if absent; returns whether presence changed
    pub fn enter(&mut self, user: UserInfo) -> bool {
        if let Some(existing) = self.users.get_mut(&user.id) {
            *existing = user;
            return false;
        }
        self.order.push(user.id);
        self.users.insert(user.id, user);
        true
    }

    /// Drop the user from presence and every attachment list
    pub fn leave(&mut self, user_id: i64) -> bool {
        if self.users.remove(&user_id).is_none() {
            return false;
        }
        self.order.retain(|id| *id != user_id);
        if let Some(names) = self.held.remove(&user_id) {
            self.release(user_id, &names);
        }
        true
    }

    pub fn attach(&mut self, user_id: i64, display_names: &[String]) {
        let held = self.held.entry(user_id).or_default();
        for name in display_names {
            let users = self.attachments.entry(name.clone()).or_default();
            if !users.contains(&user_id) {
                users.push(user_id);
            }
            if !held.contains(name) {
                held.push(name.clone());
            }
        }
    }

    pub fn detach(&mut self, user_id: i64, display_names: &[String]) {
        if let Some(held) = self.held.get_mut(&user_id) {
            held.retain(|n| !display_names.contains(n));
            if held.is_empty() {
                self.held.remove(&user_id);
            }
        }
        self.release(user_id, display_names);
    }

    fn release(&mut self, user_id: i64, display_names: &[String]) {
        for name in display_names {
            if let Some(users) = self.attachments.get_mut(name) {
                users.retain(|id| *id != user_id);
                if users.is_empty() {
                    self.attachments.remove(name);
                }
            }
        }
    }

    pub fn holds_attachments(&self, user_id: i64) -> bool {
        self.held.contains_key(&user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.users.is_empty()
    }

    pub fn present(&self) -> Vec<UserInfo> {
        self.order
            .iter()
            .filter_map(|id| self.users.get(id).cloned())
            .collect()
    }

    pub fn attached(&self) -> Vec<AttachmentView> {
        self.attachments
            .iter()
            .map(|(name, ids)| AttachmentView {
                display_name: name.clone(),
                users: ids.iter().filter_map(|id| self.users.get(id).cloned()).collect(),
            })
            .collect()
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            in_room_users: self.present(),
            attached_components: self.attached(),
        }
    }
}

/// All rooms, keyed by (team, app)
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomKey, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: RoomKey) -> Option<&Room> {
        self.rooms.get(&key)
    }

    /// The room for `key`, created on first use
    pub fn room_mut(&mut self, key: RoomKey) -> &mut Room {
        self.rooms.entry(key).or_default()
    }

    pub fn get_mut(&mut self, key: RoomKey) -> Option<&mut Room> {
        self.rooms.get_mut(&key)
    }

    /// Delete the room if nothing is left in it
    pub fn reap(&mut self, key: RoomKey) -> bool {
        if self.rooms.get(&key).is_some_and(Room::is_empty) {
            self.rooms.remove(&key);
            tracing::debug!(team_id = key.team_id, app_id = key.app_id, "Reaped empty room");
            return true;
        }
        false
    }

    /// Sessions of every room belonging to `team_id`
    pub fn team_sessions(&self, team_id: i64) -> Vec<Uuid> {
        self.rooms
            .iter()
            .filter(|(key, _)| key.team_id == team_id)
            .flat_map(|(_, room)| room.sessions())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> UserInfo {
        UserInfo {
            id,
            uid: format!("u-{}", id),
            nickname: format!("user{}", id),
            avatar: String::new(),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_enter_is_idempotent() {
        let mut room = Room::default();
        assert!(room.enter(user(1)));
        assert!(!room.enter(user(1)));
        assert!(room.enter(user(2)));
        let ids: Vec<i64> = room.present().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_presence_tracks_last_event() {
        let mut room = Room::default();
        room.enter(user(1));
        room.enter(user(2));
        room.leave(1);
        room.enter(user(3));
        room.enter(user(1));
        room.leave(2);
        let ids: Vec<i64> = room.present().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(!room.leave(2));
    }

    #[test]
    fn test_attach_and_detach() {
        let mut room = Room::default();
        room.enter(user(1));
        room.enter(user(2));
        room.attach(2, &names(&["btn1", "btn2"]));
        room.attach(2, &names(&["btn1"]));
        room.attach(1, &names(&["btn1"]));

        let view = room.attached();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].display_name, "btn1");
        let ids: Vec<i64> = view[0].users.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![2, 1]);

        room.detach(2, &names(&["btn1", "btn2"]));
        assert!(!room.holds_attachments(2));
        let view = room.attached();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].users[0].id, 1);
    }

    #[test]
    fn test_leave_releases_attachments() {
        let mut room = Room::default();
        room.enter(user(2));
        room.attach(2, &names(&["btn1"]));
        assert!(room.holds_attachments(2));
        room.leave(2);
        assert!(room.attached().is_empty());
        assert!(!room.holds_attachments(2));
    }

    #[test]
    fn test_registry_reap() {
        let mut rooms = RoomRegistry::new();
        let key = RoomKey::new(7, 42);
        let session = Uuid::new_v4();
        rooms.room_mut(key).add_session(session);
        assert!(!rooms.reap(key));
        rooms.room_mut(key).remove_session(session);
        assert!(rooms.reap(key));
        assert!(rooms.is_empty());
    }

    #[test]
    fn test_team_sessions() {
        let mut rooms = RoomRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        rooms.room_mut(RoomKey::new(7, 42)).add_session(a);
        rooms.room_mut(RoomKey::new(7, 0)).add_session(b);
        rooms.room_mut(RoomKey::new(8, 42)).add_session(c);
        let mut team = rooms.team_sessions(7);
        team.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(team, expected);
        assert_eq!(rooms.len(), 3);
    }
}
