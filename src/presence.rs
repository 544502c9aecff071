use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 128;

/// Change to the presence or typing maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Status { user_id: String, online: bool },
    Typing { conversation_id: String, user_id: String, is_typing: bool },
    Cleared,
}

#[derive(Default)]
struct Maps {
    online: HashMap<String, bool>,
    typing: HashMap<String, BTreeSet<String>>,
}

/// Ephemeral online and typing state, fed only by socket frames.
pub struct PresenceState {
    maps: RwLock<Maps>,
    changes: broadcast::Sender<PresenceChange>,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceState {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self { maps: RwLock::new(Maps::default()), changes }
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.changes.subscribe()
    }

    pub fn set_status(&self, user_id: &str, online: bool) {
        self.write().online.insert(user_id.to_string(), online);
        debug!(user_id, online, "presence updated");
        let _ = self.changes.send(PresenceChange::Status { user_id: user_id.to_string(), online });
    }

    /// Last reported status; `None` until a frame for this user arrived.
    pub fn status(&self, user_id: &str) -> Option<bool> {
        self.read().online.get(user_id).copied()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.status(user_id).unwrap_or(false)
    }

    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .read()
            .online
            .iter()
            .filter(|(_, online)| **online)
            .map(|(id, _)| id.clone())
            .collect();
        users.sort();
        users
    }

    pub fn set_typing(&self, conversation_id: &str, user_id: &str, is_typing: bool) {
        {
            let mut maps = self.write();
            if is_typing {
                maps.typing
                    .entry(conversation_id.to_string())
                    .or_default()
                    .insert(user_id.to_string());
            } else if let Some(users) = maps.typing.get_mut(conversation_id) {
                users.remove(user_id);
                if users.is_empty() {
                    maps.typing.remove(conversation_id);
                }
            }
        }
        let _ = self.changes.send(PresenceChange::Typing {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            is_typing,
        });
    }

    pub fn is_typing(&self, conversation_id: &str, user_id: &str) -> bool {
        self.read()
            .typing
            .get(conversation_id)
            .is_some_and(|users| users.contains(user_id))
    }

    /// Users typing in a conversation, sorted.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.read()
            .typing
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Typing users other than `excluding` (normally the current user).
    pub fn typing_in(&self, conversation_id: &str, excluding: &str) -> Vec<String> {
        self.typing_users(conversation_id)
            .into_iter()
            .filter(|id| id != excluding)
            .collect()
    }

    /// Forgets everything; used when the connection that fed these maps is lost.
    pub fn clear(&self) {
        {
            let mut maps = self.write();
            if maps.online.is_empty() && maps.typing.is_empty() {
                return;
            }
            maps.online.clear();
            maps.typing.clear();
        }
        debug!("presence and typing state cleared");
        let _ = self.changes.send(PresenceChange::Cleared);
    }
}

/// Header text for the typing indicator, e.g. "Linh is typing...".
pub fn typing_summary(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{one} is typing...")),
        many => Some(format!("{} people are typing...", many.len())),
    }
}
