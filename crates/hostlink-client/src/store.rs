//! Shared session state.
//!
//! One [`SessionStore`] per session, owned for the session's lifetime.
//! The state machine and its message handlers are the only writers; UI
//! collaborators hold the [`SharedStore`] and read through
//! [`SessionStore::snapshot`], so reads never observe a half-applied update.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hostlink_core::ConnectionStatus;
use tokio::sync::RwLock;

/// Chat log capacity. Appending past this evicts the oldest line.
pub const CHAT_LOG_CAPACITY: usize = 100;

pub type SharedStore = Arc<RwLock<SessionStore>>;

/// One line in the chat log.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    Player {
        id: u64,
        player_id: u32,
        text: String,
        timestamp: u64,
    },
    System {
        id: u64,
        text: String,
        timestamp: u64,
    },
}

impl ChatMessage {
    pub fn text(&self) -> &str {
        match self {
            ChatMessage::Player { text, .. } | ChatMessage::System { text, .. } => text,
        }
    }
}

/// What the local client currently knows about itself and its peers.
#[derive(Debug, Default)]
pub struct SessionStore {
    status: ConnectionStatus,
    player_id: Option<u32>,

    // Local profile, seeded into the peer maps once a player id is assigned.
    name: String,
    avatar: String,
    handle: String,

    // Peer metadata, keyed by player id.
    peers: BTreeSet<u32>,
    names: HashMap<u32, String>,
    avatars: HashMap<u32, String>,
    handles: HashMap<u32, String>,
    locations: HashMap<u32, [f32; 7]>,
    last_location_updates: HashMap<u32, u64>,
    falling: HashMap<u32, bool>,

    chat: VecDeque<ChatMessage>,
    next_chat_id: u64,
}

/// Point-in-time copy handed to read-only observers.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub status: ConnectionStatus,
    pub player_id: Option<u32>,
    pub name: String,
    pub avatar: String,
    pub handle: String,
    pub peers: Vec<PeerSnapshot>,
    pub chat: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub id: u32,
    pub display_name: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub handle: Option<String>,
    pub location: Option<[f32; 7]>,
    pub last_location_update: Option<u64>,
    pub falling: bool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    /// Assign (or clear) the local player identifier.
    ///
    /// The same value is a no-op. Otherwise the previous identifier's
    /// metadata is evicted and the new identifier's is seeded from the local
    /// profile.
    pub fn set_player_id(&mut self, player_id: Option<u32>) {
        if self.player_id == player_id {
            return;
        }

        if let Some(old) = self.player_id {
            self.names.remove(&old);
            self.avatars.remove(&old);
            self.handles.remove(&old);
        }

        if let Some(new) = player_id {
            self.names.insert(new, self.name.clone());
            self.avatars.insert(new, self.avatar.clone());
            self.handles.insert(new, self.handle.clone());
        }

        self.player_id = player_id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        if let Some(id) = self.player_id {
            self.names.insert(id, self.name.clone());
        }
    }

    pub fn avatar(&self) -> &str {
        &self.avatar
    }

    pub fn set_avatar(&mut self, avatar: impl Into<String>) {
        self.avatar = avatar.into();
        if let Some(id) = self.player_id {
            self.avatars.insert(id, self.avatar.clone());
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn set_handle(&mut self, handle: impl Into<String>) {
        self.handle = handle.into();
        if let Some(id) = self.player_id {
            self.handles.insert(id, self.handle.clone());
        }
    }

    pub fn add_peer(&mut self, player_id: u32) {
        self.peers.insert(player_id);
    }

    pub fn remove_peer(&mut self, player_id: u32) {
        self.peers.remove(&player_id);
        self.names.remove(&player_id);
        self.avatars.remove(&player_id);
        self.handles.remove(&player_id);
        self.locations.remove(&player_id);
        self.last_location_updates.remove(&player_id);
        self.falling.remove(&player_id);
    }

    /// Drop every peer record. Used when the socket closes; the roster is
    /// re-announced on the next successful join.
    pub fn clear_peers(&mut self) {
        self.peers.clear();
        let local = self.player_id;
        self.names.retain(|id, _| Some(*id) == local);
        self.avatars.retain(|id, _| Some(*id) == local);
        self.handles.retain(|id, _| Some(*id) == local);
        self.locations.clear();
        self.last_location_updates.clear();
        self.falling.clear();
    }

    pub fn set_peer_name(&mut self, player_id: u32, name: Option<String>) {
        match name {
            Some(name) => self.names.insert(player_id, name),
            None => self.names.remove(&player_id),
        };
    }

    pub fn set_peer_avatar(&mut self, player_id: u32, avatar: Option<String>) {
        match avatar {
            Some(avatar) => self.avatars.insert(player_id, avatar),
            None => self.avatars.remove(&player_id),
        };
    }

    pub fn set_peer_handle(&mut self, player_id: u32, handle: Option<String>) {
        match handle {
            Some(handle) => self.handles.insert(player_id, handle),
            None => self.handles.remove(&player_id),
        };
    }

    pub fn set_peer_location(&mut self, player_id: u32, location: [f32; 7]) {
        self.locations.insert(player_id, location);
        self.last_location_updates.insert(player_id, now_millis());
    }

    pub fn set_peer_falling(&mut self, player_id: u32, falling: bool) {
        self.falling.insert(player_id, falling);
    }

    /// Display name for a player: external handle, then display name, then a
    /// guest label derived from the identifier.
    pub fn display_name(&self, player_id: u32) -> String {
        if let Some(handle) = self.handles.get(&player_id)
            && !handle.is_empty()
        {
            return handle.clone();
        }

        if let Some(name) = self.names.get(&player_id)
            && !name.is_empty()
        {
            return name.clone();
        }

        format!("Guest 0x{player_id:x}")
    }

    /// Append to the chat log, evicting the oldest line past capacity.
    pub fn add_chat_message(&mut self, message: ChatMessage) {
        self.chat.push_back(message);
        if self.chat.len() > CHAT_LOG_CAPACITY {
            self.chat.pop_front();
        }
    }

    pub fn push_system_message(&mut self, text: impl Into<String>) {
        let message = ChatMessage::System {
            id: self.next_chat_id(),
            text: text.into(),
            timestamp: now_millis(),
        };
        self.add_chat_message(message);
    }

    pub fn push_player_message(&mut self, player_id: u32, text: String, timestamp: u64) {
        let message = ChatMessage::Player {
            id: self.next_chat_id(),
            player_id,
            text,
            timestamp,
        };
        self.add_chat_message(message);
    }

    pub fn chat_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat.iter()
    }

    /// Clear all session-scoped state. The local profile survives.
    pub fn reset(&mut self) {
        self.set_player_id(None);
        self.clear_peers();
        self.chat.clear();
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            status: self.status,
            player_id: self.player_id,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            handle: self.handle.clone(),
            peers: self
                .peers
                .iter()
                .map(|&id| PeerSnapshot {
                    id,
                    display_name: self.display_name(id),
                    name: self.names.get(&id).cloned(),
                    avatar: self.avatars.get(&id).cloned(),
                    handle: self.handles.get(&id).cloned(),
                    location: self.locations.get(&id).copied(),
                    last_location_update: self.last_location_updates.get(&id).copied(),
                    falling: self.falling.get(&id).copied().unwrap_or(false),
                })
                .collect(),
            chat: self.chat.iter().cloned().collect(),
        }
    }

    fn next_chat_id(&mut self) -> u64 {
        let id = self.next_chat_id;
        self.next_chat_id += 1;
        id
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassigning_player_id_evicts_and_reseeds() {
        let mut store = SessionStore::new();
        store.set_name("Alice");
        store.set_avatar("https://example.com/alice.vrm");
        store.set_handle("alice.eth");

        store.set_player_id(Some(1));
        assert_eq!(store.display_name(1), "alice.eth");

        store.set_player_id(Some(2));
        assert_eq!(store.display_name(2), "alice.eth");
        // Everything keyed by the old identifier is gone.
        assert_eq!(store.display_name(1), "Guest 0x1");
    }

    #[test]
    fn same_player_id_is_a_no_op() {
        let mut store = SessionStore::new();
        store.set_player_id(Some(1));
        store.set_peer_name(1, Some("Renamed".to_string()));

        store.set_player_id(Some(1));
        // No eviction, no reseed.
        assert_eq!(store.display_name(1), "Renamed");
    }

    #[test]
    fn profile_changes_mirror_into_peer_maps() {
        let mut store = SessionStore::new();
        store.set_player_id(Some(5));
        store.set_name("Bob");
        assert_eq!(store.display_name(5), "Bob");
    }

    #[test]
    fn chat_log_is_a_fixed_capacity_ring() {
        let mut store = SessionStore::new();
        for i in 0..(CHAT_LOG_CAPACITY as u64 + 1) {
            store.push_system_message(format!("line {i}"));
        }

        let lines: Vec<_> = store.chat_messages().collect();
        assert_eq!(lines.len(), CHAT_LOG_CAPACITY);
        // Oldest evicted, order preserved.
        assert_eq!(lines[0].text(), "line 1");
        assert_eq!(lines[CHAT_LOG_CAPACITY - 1].text(), "line 100");
    }

    #[test]
    fn display_name_fallback_chain() {
        let mut store = SessionStore::new();
        store.add_peer(3);

        assert_eq!(store.display_name(3), "Guest 0x3");

        store.set_peer_name(3, Some("Bob".to_string()));
        assert_eq!(store.display_name(3), "Bob");

        store.set_peer_handle(3, Some("bob.eth".to_string()));
        assert_eq!(store.display_name(3), "bob.eth");
    }

    #[test]
    fn guest_label_uses_hex() {
        let store = SessionStore::new();
        assert_eq!(store.display_name(255), "Guest 0xff");
    }

    #[test]
    fn remove_peer_clears_every_map() {
        let mut store = SessionStore::new();
        store.add_peer(9);
        store.set_peer_name(9, Some("Eve".to_string()));
        store.set_peer_location(9, [0.0; 7]);
        store.set_peer_falling(9, true);

        store.remove_peer(9);
        let snapshot = store.snapshot();
        assert!(snapshot.peers.is_empty());
        assert_eq!(store.display_name(9), "Guest 0x9");
    }

    #[test]
    fn clear_peers_keeps_local_metadata() {
        let mut store = SessionStore::new();
        store.set_name("Alice");
        store.set_player_id(Some(1));
        store.add_peer(2);
        store.set_peer_name(2, Some("Bob".to_string()));

        store.clear_peers();
        assert_eq!(store.display_name(1), "Alice");
        assert_eq!(store.display_name(2), "Guest 0x2");
    }
}
