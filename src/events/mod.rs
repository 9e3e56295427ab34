//! Append-only event topics with cursor-based consumers
//!
//! Producers push into a topic; each consumer owns a [`Cursor`] and reads
//! everything appended since its last read. Topics are never truncated during
//! a session. [`EventManager::reset_session`] starts a new session: topics are
//! emptied and the epoch bump makes every outstanding cursor restart at zero.

use serde::{Deserialize, Serialize};

use crate::world::EntityId;

/// A connected player asked to join the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoinEvent {
    pub player_id: u32,
}

/// A player's connection closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDisconnectEvent {
    pub player_id: u32,
}

/// An entity was added to the world and should be announced to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntityEvent {
    pub entity_id: EntityId,
}

/// An entity left the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyEntityEvent {
    pub entity_id: EntityId,
}

/// A console-style command sent by a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEvent {
    pub player_id: u32,
    pub command: String,
}

/// Read position into a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    position: usize,
    epoch: u64,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

#[derive(Debug, Clone)]
pub struct Topic<T> {
    events: Vec<T>,
    epoch: u64,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            epoch: 0,
        }
    }
}

impl<T> Topic<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: T) {
        self.events.push(event);
    }

    /// Events appended since `cursor` last read, advancing it to the end.
    pub fn read(&self, cursor: &mut Cursor) -> &[T] {
        if cursor.epoch != self.epoch {
            *cursor = Cursor {
                position: 0,
                epoch: self.epoch,
            };
        }
        let start = cursor.position.min(self.events.len());
        cursor.position = self.events.len();
        &self.events[start..]
    }

    /// Events since `cursor` without advancing it.
    pub fn peek(&self, cursor: &Cursor) -> &[T] {
        if cursor.epoch != self.epoch {
            return &self.events;
        }
        &self.events[cursor.position.min(self.events.len())..]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn reset(&mut self) {
        self.events.clear();
        self.epoch += 1;
    }
}

/// The topics shared by server and client systems.
#[derive(Debug, Default)]
pub struct EventManager {
    pub player_join: Topic<PlayerJoinEvent>,
    pub player_disconnect: Topic<PlayerDisconnectEvent>,
    pub create_entity: Topic<CreateEntityEvent>,
    pub destroy_entity: Topic<DestroyEntityEvent>,
    pub rpc: Topic<RpcEvent>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_session(&mut self) {
        self.player_join.reset();
        self.player_disconnect.reset();
        self.create_entity.reset();
        self.destroy_entity.reset();
        self.rpc.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_cursors_see_every_event_once() {
        let mut topic = Topic::new();
        let mut a = Cursor::new();
        let mut b = Cursor::new();

        topic.push(1);
        topic.push(2);
        assert_eq!(topic.read(&mut a), &[1, 2]);
        topic.push(3);
        assert_eq!(topic.read(&mut a), &[3]);
        assert_eq!(topic.read(&mut b), &[1, 2, 3]);
        assert!(topic.read(&mut a).is_empty());
        assert_eq!(topic.len(), 3);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut topic = Topic::new();
        let cursor = Cursor::new();
        topic.push("x");
        assert_eq!(topic.peek(&cursor), &["x"]);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn session_reset_restarts_stale_cursors() {
        let mut events = EventManager::new();
        let mut cursor = Cursor::new();
        events.rpc.push(RpcEvent {
            player_id: 1,
            command: "respawn".into(),
        });
        assert_eq!(events.rpc.read(&mut cursor).len(), 1);

        events.reset_session();
        events.rpc.push(RpcEvent {
            player_id: 2,
            command: "respawn".into(),
        });
        let fresh = events.rpc.read(&mut cursor);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].player_id, 2);
    }
}
