//! Live views of rooms backed by store watchers
//!
//! Dropping a subscription unsubscribes it.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::Room;
use crate::store::{CollectionWatch, DocumentWatch};

/// Follows a single room: the current value first, then every change,
/// `None` once the room is deleted
pub struct RoomSubscription {
    room_id: String,
    rx: DocumentWatch,
}

impl RoomSubscription {
    pub(crate) fn new(room_id: String, rx: DocumentWatch) -> Self {
        Self { room_id, rx }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Latest known state, marking it as seen
    pub fn latest(&mut self) -> Result<Option<Room>> {
        let value = self.rx.borrow_and_update().clone();
        decode_room(&self.room_id, value)
    }

    /// Whether a change arrived since the last `latest`/`changed`
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next change and return the new state
    pub async fn changed(&mut self) -> Result<Option<Room>> {
        self.rx.changed().await.map_err(|_| Error::StoreClosed)?;
        self.latest()
    }
}

/// Follows every room, or only the rooms of one creator, newest first
pub struct RoomsSubscription {
    creator_id: Option<String>,
    rx: CollectionWatch,
}

impl RoomsSubscription {
    pub(crate) fn new(creator_id: Option<String>, rx: CollectionWatch) -> Self {
        Self { creator_id, rx }
    }

    pub fn latest(&mut self) -> Result<Vec<Room>> {
        let docs = self.rx.borrow_and_update().clone();
        decode_rooms(docs, self.creator_id.as_deref())
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub async fn changed(&mut self) -> Result<Vec<Room>> {
        self.rx.changed().await.map_err(|_| Error::StoreClosed)?;
        self.latest()
    }
}

fn decode_room(room_id: &str, value: Option<Value>) -> Result<Option<Room>> {
    value.map(|v| Room::from_document(room_id, v)).transpose()
}

/// Decode a collection listing, optionally keeping one creator's rooms,
/// sorted by creation time (newest first)
pub(crate) fn decode_rooms(docs: Vec<(String, Value)>, creator_id: Option<&str>) -> Result<Vec<Room>> {
    let mut rooms = docs
        .into_iter()
        .map(|(id, value)| Room::from_document(&id, value))
        .collect::<Result<Vec<_>>>()?;

    if let Some(creator) = creator_id {
        rooms.retain(|room| room.creator_id.as_deref() == Some(creator));
    }

    rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rooms)
}
