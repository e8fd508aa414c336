use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use murmur_types::events::PresenceSnapshot;
use murmur_types::models::PresenceStatus;

use crate::registry::ConnectionId;

#[derive(Debug)]
struct PresenceEntry {
    status: PresenceStatus,
    connections: HashSet<ConnectionId>,
}

/// Presence of connected users. A user stays online while at least one of
/// their connections is alive; the entry goes away with the last one, so the
/// table never outgrows the set of live connections.
///
/// Every method returns the new snapshot only when the visible status
/// changed, so callers know whether to broadcast.
#[derive(Debug, Default)]
pub struct PresenceTable {
    entries: HashMap<Uuid, PresenceEntry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, user_id: Uuid, conn_id: ConnectionId) -> Option<PresenceSnapshot> {
        let entry = self.entries.entry(user_id).or_insert_with(|| PresenceEntry {
            status: PresenceStatus::Offline,
            connections: HashSet::new(),
        });
        entry.connections.insert(conn_id);

        if entry.status == PresenceStatus::Offline {
            entry.status = PresenceStatus::Online;
            return Some(snapshot(user_id, entry.status, None));
        }
        None
    }

    /// Drop a connection. The last one takes the user offline, stamped with
    /// `now` as last seen.
    pub fn disconnect(
        &mut self,
        user_id: Uuid,
        conn_id: ConnectionId,
        now: DateTime<Utc>,
    ) -> Option<PresenceSnapshot> {
        let entry = self.entries.get_mut(&user_id)?;
        if !entry.connections.remove(&conn_id) || !entry.connections.is_empty() {
            return None;
        }
        self.entries.remove(&user_id);
        Some(snapshot(user_id, PresenceStatus::Offline, Some(now)))
    }

    /// Explicit online/away push. Ignored for users with no live connection.
    pub fn set_status(&mut self, user_id: Uuid, status: PresenceStatus) -> Option<PresenceSnapshot> {
        let entry = self.entries.get_mut(&user_id)?;
        if entry.status == status {
            return None;
        }
        entry.status = status;
        Some(snapshot(user_id, status, None))
    }

    pub fn status(&self, user_id: Uuid) -> PresenceStatus {
        self.entries
            .get(&user_id)
            .map_or(PresenceStatus::Offline, |e| e.status)
    }

    /// Everyone currently connected.
    pub fn snapshot(&self) -> Vec<PresenceSnapshot> {
        self.entries
            .iter()
            .map(|(id, e)| snapshot(*id, e.status, None))
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }
}

fn snapshot(user_id: Uuid, status: PresenceStatus, last_seen: Option<DateTime<Utc>>) -> PresenceSnapshot {
    PresenceSnapshot {
        user_id,
        status,
        last_seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_connection_keeps_user_online() {
        let mut table = PresenceTable::new();
        let user = Uuid::new_v4();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(table.connect(user, c1).is_some());
        assert!(table.connect(user, c2).is_none(), "already online");

        assert!(table.disconnect(user, c1, Utc::now()).is_none());
        assert_eq!(table.status(user), PresenceStatus::Online);

        let now = Utc::now();
        let gone = table.disconnect(user, c2, now).unwrap();
        assert_eq!(gone.status, PresenceStatus::Offline);
        assert_eq!(gone.last_seen, Some(now));
    }

    #[test]
    fn away_only_for_connected_users() {
        let mut table = PresenceTable::new();
        let user = Uuid::new_v4();
        assert!(table.set_status(user, PresenceStatus::Away).is_none());

        let conn = Uuid::new_v4();
        table.connect(user, conn);
        assert_eq!(table.set_status(user, PresenceStatus::Away).unwrap().status, PresenceStatus::Away);
        assert!(table.set_status(user, PresenceStatus::Away).is_none(), "no change, no event");
        assert_eq!(table.online_count(), 1);

        table.disconnect(user, conn, Utc::now());
        assert!(table.set_status(user, PresenceStatus::Online).is_none());
        assert_eq!(table.online_count(), 0);
    }

    #[test]
    fn offline_users_leave_the_table() {
        let mut table = PresenceTable::new();
        for _ in 0..100 {
            let (user, conn) = (Uuid::new_v4(), Uuid::new_v4());
            table.connect(user, conn);
            table.disconnect(user, conn, Utc::now());
        }
        let stays = Uuid::new_v4();
        table.connect(stays, Uuid::new_v4());

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, stays);
        assert_eq!(snapshot[0].status, PresenceStatus::Online);
    }

    #[test]
    fn unknown_connection_does_not_take_user_offline() {
        let mut table = PresenceTable::new();
        let user = Uuid::new_v4();
        table.connect(user, Uuid::new_v4());
        assert!(table.disconnect(user, Uuid::new_v4(), Utc::now()).is_none());
        assert_eq!(table.status(user), PresenceStatus::Online);
    }
}
