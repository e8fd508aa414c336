use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use uuid::Uuid;

use murmur_types::events::GatewayEvent;

pub type ConnectionId = Uuid;

struct ConnectionEntry {
    user_id: Uuid,
    display_name: String,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

/// Who is connected and which rooms (conversation channels) each connection
/// has joined. Kept in both directions so fan-out and disconnect are both
/// proportional to what they touch.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        conn_id: ConnectionId,
        user_id: Uuid,
        display_name: String,
        tx: mpsc::UnboundedSender<GatewayEvent>,
    ) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                display_name,
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Remove a connection from the registry and every room it was in.
    /// Returns the owning user and the rooms it left.
    pub fn unregister(&mut self, conn_id: ConnectionId) -> Option<(Uuid, Vec<Uuid>)> {
        let entry = self.connections.remove(&conn_id)?;
        for room in &entry.rooms {
            self.drop_from_room(*room, conn_id);
        }
        Some((entry.user_id, entry.rooms.into_iter().collect()))
    }

    /// Returns false if the connection is unknown or already in the room.
    pub fn join(&mut self, conn_id: ConnectionId, room: Uuid) -> bool {
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.insert(room) {
            return false;
        }
        self.rooms.entry(room).or_default().insert(conn_id);
        true
    }

    /// Returns false if the connection was not in the room.
    pub fn leave(&mut self, conn_id: ConnectionId, room: Uuid) -> bool {
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.remove(&room) {
            return false;
        }
        self.drop_from_room(room, conn_id);
        true
    }

    pub fn identity(&self, conn_id: ConnectionId) -> Option<(Uuid, String)> {
        self.connections
            .get(&conn_id)
            .map(|e| (e.user_id, e.display_name.clone()))
    }

    pub fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, e)| e.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_in_room(&self, conn_id: ConnectionId, room: Uuid) -> bool {
        self.rooms.get(&room).is_some_and(|members| members.contains(&conn_id))
    }

    pub fn room_size(&self, room: Uuid) -> usize {
        self.rooms.get(&room).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue an event for one connection. A closed receiver just means the
    /// connection is on its way out; disconnect will clean it up.
    pub fn send_to(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        match self.connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to every connection in a room, optionally skipping all
    /// connections of one user. Returns the number of connections reached.
    pub fn fan_out(&self, room: Uuid, event: &GatewayEvent, exclude_user: Option<Uuid>) -> usize {
        let Some(members) = self.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members {
            let Some(entry) = self.connections.get(conn_id) else {
                continue;
            };
            if exclude_user == Some(entry.user_id) {
                continue;
            }
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an event to every connection.
    pub fn broadcast(&self, event: &GatewayEvent) -> usize {
        self.connections
            .values()
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    fn drop_from_room(&mut self, room: Uuid, conn_id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &mut Registry, user: Uuid) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, user, "someone".into(), tx);
        (conn, rx)
    }

    fn ping(room: Uuid) -> GatewayEvent {
        GatewayEvent::Joined { conversation_id: room }
    }

    #[test]
    fn fan_out_skips_excluded_user_and_other_rooms() {
        let mut registry = Registry::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let room = Uuid::new_v4();
        let (a1, mut a1_rx) = connect(&mut registry, alice);
        let (a2, mut a2_rx) = connect(&mut registry, alice);
        let (b1, mut b1_rx) = connect(&mut registry, bob);
        let (_outside, mut outside_rx) = connect(&mut registry, bob);

        for conn in [a1, a2, b1] {
            assert!(registry.join(conn, room));
        }
        assert!(!registry.join(a1, room), "joining twice is a no-op");

        assert_eq!(registry.fan_out(room, &ping(room), Some(alice)), 1);
        assert!(b1_rx.try_recv().is_ok());
        assert!(a1_rx.try_recv().is_err());
        assert!(a2_rx.try_recv().is_err());
        assert!(outside_rx.try_recv().is_err());

        assert_eq!(registry.fan_out(room, &ping(room), None), 3);
    }

    #[test]
    fn unregister_leaves_every_room() {
        let mut registry = Registry::new();
        let user = Uuid::new_v4();
        let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
        let (conn, _rx) = connect(&mut registry, user);
        registry.join(conn, r1);
        registry.join(conn, r2);

        let (owner, mut left) = registry.unregister(conn).unwrap();
        left.sort();
        let mut expected = vec![r1, r2];
        expected.sort();
        assert_eq!(owner, user);
        assert_eq!(left, expected);
        assert_eq!(registry.room_size(r1), 0);
        assert!(registry.unregister(conn).is_none());
    }

    #[test]
    fn leave_is_idempotent() {
        let mut registry = Registry::new();
        let room = Uuid::new_v4();
        let (conn, _rx) = connect(&mut registry, Uuid::new_v4());
        registry.join(conn, room);

        assert!(registry.leave(conn, room));
        assert!(!registry.leave(conn, room));
        assert!(!registry.is_in_room(conn, room));
    }
}
