//! Room directory — named groups of connections for fan-out broadcast.
//!
//! DESIGN
//! ======
//! One map from room name to members, shared by every connection of a
//! server and guarded by a single mutex. Membership is non-owning: members
//! are held as [`WeakConnection`]s keyed by connection id, so a room never
//! keeps a connection alive. References whose connection is gone are pruned
//! on broadcast; closed connections are removed with [`RoomDirectory::leave_all`].
//!
//! Broadcast snapshots the members under the lock and emits after releasing
//! it, so listeners triggered by a broadcast may join or leave freely.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use crate::args::Payload;
use crate::connection::{Connection, ConnectionId, WeakConnection};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    UnknownRoom(String),
    #[error("room name must not be empty")]
    InvalidName,
}

type Members = HashMap<ConnectionId, WeakConnection>;

#[derive(Default)]
pub struct RoomDirectory {
    rooms: Mutex<HashMap<String, Members>>,
}

impl RoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Members>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `conn` to `room`, creating the room if absent. Returns `false` if
    /// it was already a member.
    ///
    /// # Errors
    ///
    /// [`RoomError::InvalidName`] for an empty room name.
    pub fn join(&self, room: &str, conn: &Connection) -> Result<bool, RoomError> {
        if room.is_empty() {
            return Err(RoomError::InvalidName);
        }
        let connection_id = conn.id();
        let mut rooms = self.rooms();
        let members = rooms.entry(room.to_owned()).or_default();
        let added = members.insert(connection_id, conn.downgrade()).is_none();
        if added {
            info!(%connection_id, room, members = members.len(), "room: joined");
        }
        Ok(added)
    }

    /// Remove one member from `room`. An emptied room is deleted. Returns
    /// whether the connection was a member.
    pub fn leave(&self, room: &str, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms();
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if removed {
            info!(%connection_id, room, remaining = members.len(), "room: left");
        }
        if members.is_empty() {
            rooms.remove(room);
            debug!(room, "room: removed empty room");
        }
        removed
    }

    /// Remove `connection_id` from every room. Returns the rooms it left.
    pub fn leave_all(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut rooms = self.rooms();
        let mut left = Vec::new();
        rooms.retain(|name, members| {
            if members.remove(&connection_id).is_some() {
                left.push(name.clone());
            }
            !members.is_empty()
        });
        left.sort_unstable();
        if !left.is_empty() {
            info!(%connection_id, rooms = ?left, "room: left all");
        }
        left
    }

    /// Emit `event` with `values` to every live member of `room`, except
    /// `exclude`. Members that are not open are skipped. Returns the number
    /// of members the event was sent to.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownRoom`] if the room does not exist.
    pub fn broadcast(
        &self,
        room: &str,
        event: &str,
        values: &[Value],
        exclude: Option<ConnectionId>,
    ) -> Result<usize, RoomError> {
        let targets = self.snapshot(room)?;
        let mut reached = 0;
        for conn in targets {
            if exclude == Some(conn.id()) {
                continue;
            }
            if conn.emit(event, values.iter().cloned().map(Payload::Value)) {
                reached += 1;
            }
        }
        debug!(room, event, reached, "room: broadcast");
        Ok(reached)
    }

    /// Upgrade the members of `room`, pruning dead references.
    fn snapshot(&self, room: &str) -> Result<Vec<Connection>, RoomError> {
        let mut rooms = self.rooms();
        let Some(members) = rooms.get_mut(room) else {
            return Err(RoomError::UnknownRoom(room.to_owned()));
        };
        let mut live = Vec::with_capacity(members.len());
        members.retain(|_, weak| match weak.upgrade() {
            Some(conn) => {
                live.push(conn);
                true
            }
            None => false,
        });
        if members.is_empty() {
            rooms.remove(room);
        }
        Ok(live)
    }

    /// Ids of the members of `room`; empty for unknown rooms.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        let rooms = self.rooms();
        let mut ids: Vec<ConnectionId> = rooms
            .get(room)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Rooms that `connection_id` belongs to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut names: Vec<String> = self
            .rooms()
            .iter()
            .filter(|(_, members)| members.contains_key(&connection_id))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
