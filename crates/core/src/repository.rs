//! Room repository - create, edit, list and watch rooms
//!
//! Every edit of an existing room is a single-document transaction, the same
//! primitive the assignment engine uses, so an edit and a concurrent draw
//! serialize instead of overwriting each other.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::ids;
use crate::invariants::assert_room_invariants;
use crate::models::{LocalParticipant, Participant, Room};
use crate::store::{transact, CasResult, DocumentStore, RetryPolicy, ROOMS};
use crate::subscription::{decode_rooms, RoomSubscription, RoomsSubscription};
use crate::validation::{validate_participant_names, validate_pin, validate_room_name};

/// Input for `create_room`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: String,
    pub participant_names: Vec<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub secured: bool,
}

/// Key and PIN of a freshly created room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

pub struct RoomRepository<S: ?Sized> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S: DocumentStore + ?Sized> RoomRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create an open room with every participant available as a target
    #[instrument(skip(self, new_room), fields(name = %new_room.name))]
    pub fn create_room(&self, new_room: NewRoom) -> Result<CreatedRoom> {
        let name = validate_room_name(&new_room.name)?;
        let names = validate_participant_names(&new_room.participant_names)?;

        let now = ids::now_millis();
        let participants = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Participant::new(ids::participant_id(i, now), name))
            .collect();

        let mut room = Room::new(name, participants, now);
        if let Some(creator) = new_room.creator_id {
            room = room.with_creator(creator);
        }

        let pin = new_room
            .secured
            .then(|| ids::generate_pin(&mut rand::thread_rng()));
        if let Some(pin) = &pin {
            room = room.with_pin(pin.clone());
        }

        let doc = room.to_document()?;

        // Expected version 0 only succeeds on a never-used key
        for _ in 0..self.policy.max_attempts {
            let room_id = self.store.generate_id(ROOMS);
            match self.store.compare_and_swap(ROOMS, &room_id, 0, Some(&doc))? {
                CasResult::Committed(_) => {
                    info!(room_id = %room_id, participants = room.participant_count(), "Room created");
                    return Ok(CreatedRoom { room_id, pin });
                }
                CasResult::Conflict { .. } => {
                    debug!(room_id = %room_id, "Generated room id already taken");
                }
            }
        }

        Err(Error::TransactionAborted {
            attempts: self.policy.max_attempts,
        })
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        self.store
            .read(ROOMS, room_id)?
            .value
            .map(|value| Room::from_document(room_id, value))
            .transpose()
    }

    /// Like `get_room`, but a missing room is an error
    pub fn require_room(&self, room_id: &str) -> Result<Room> {
        self.get_room(room_id)?
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))
    }

    pub fn subscribe_to_room(&self, room_id: &str) -> Result<RoomSubscription> {
        let rx = self.store.watch(ROOMS, room_id)?;
        Ok(RoomSubscription::new(room_id.to_string(), rx))
    }

    #[instrument(skip(self))]
    pub fn update_room_name(&self, room_id: &str, name: &str) -> Result<Room> {
        let name = validate_room_name(name)?;
        self.modify(room_id, |room| {
            room.name = name.clone();
            Ok(())
        })
    }

    /// Replace the participant list; all previous draws are cleared
    ///
    /// Names that were already in the room (ignoring case) keep their ids.
    #[instrument(skip(self, names))]
    pub fn update_room_participants(&self, room_id: &str, names: &[String]) -> Result<Room> {
        let names = validate_participant_names(names)?;
        self.modify(room_id, |room| {
            let participants = carry_over_participants(room, &names, ids::now_millis());
            room.replace_participants(participants);
            Ok(())
        })
    }

    /// Clear every draw, leaving participants unchanged
    #[instrument(skip(self))]
    pub fn reset_room_assignments(&self, room_id: &str) -> Result<Room> {
        self.modify(room_id, |room| {
            room.reset_assignments();
            Ok(())
        })
    }

    /// Delete a room; deleting a missing room is not an error
    #[instrument(skip(self))]
    pub fn delete_room(&self, room_id: &str) -> Result<()> {
        self.store.remove(ROOMS, room_id)?;
        info!(room_id, "Room deleted");
        Ok(())
    }

    /// Every room, newest first
    pub fn list_rooms(&self) -> Result<Vec<Room>> {
        decode_rooms(self.store.list(ROOMS)?, None)
    }

    pub fn subscribe_to_all_rooms(&self) -> Result<RoomsSubscription> {
        Ok(RoomsSubscription::new(None, self.store.watch_collection(ROOMS)?))
    }

    /// Rooms created by `creator_id`, newest first
    pub fn list_user_rooms(&self, creator_id: &str) -> Result<Vec<Room>> {
        decode_rooms(self.store.list(ROOMS)?, Some(creator_id))
    }

    pub fn subscribe_to_user_rooms(&self, creator_id: &str) -> Result<RoomsSubscription> {
        Ok(RoomsSubscription::new(
            Some(creator_id.to_string()),
            self.store.watch_collection(ROOMS)?,
        ))
    }

    /// Check a PIN against a room; unsecured rooms accept anything
    pub fn verify_room_pin(&self, room_id: &str, pin: &str) -> Result<bool> {
        let room = self.require_room(room_id)?;
        if !room.is_secured {
            return Ok(true);
        }
        validate_pin(pin.trim())?;
        Ok(room.pin.as_deref() == Some(pin.trim()))
    }

    /// Resolve a participant by name, with their target once drawn
    pub fn identify(&self, room_id: &str, name: &str) -> Result<LocalParticipant> {
        let room = self.require_room(room_id)?;
        let participant_id = room
            .find_participant_id_by_name(name)
            .ok_or_else(|| Error::UnknownParticipant(name.trim().to_string()))?;
        let participant = &room.participants[participant_id];

        Ok(LocalParticipant {
            participant_id: participant.id.clone(),
            name: participant.name.clone(),
            target_name: room.target_name(participant_id).map(str::to_string),
        })
    }

    /// Apply `edit` to an existing room inside a transaction
    fn modify<F>(&self, room_id: &str, mut edit: F) -> Result<Room>
    where
        F: FnMut(&mut Room) -> Result<()>,
    {
        let mut committed = None;

        transact(self.store.as_ref(), ROOMS, room_id, self.policy, |current| {
            let value = current.ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;
            let mut room = Room::from_document(room_id, value.clone())?;
            edit(&mut room)?;
            assert_room_invariants(&room);
            let doc = room.to_document()?;
            committed = Some(room);
            Ok(Some(doc))
        })?;

        committed.ok_or_else(|| Error::RoomNotFound(room_id.to_string()))
    }
}

/// New participant list for `names`, reusing ids of names already in `room`
fn carry_over_participants(room: &Room, names: &[String], now_ms: i64) -> Vec<Participant> {
    let mut taken: HashSet<String> = room.participants.keys().cloned().collect();
    let mut next_index = 0;

    names
        .iter()
        .map(|name| {
            if let Some(id) = room.find_participant_id_by_name(name) {
                return Participant::new(id, name.clone());
            }
            let id = loop {
                let candidate = ids::participant_id(next_index, now_ms);
                next_index += 1;
                if taken.insert(candidate.clone()) {
                    break candidate;
                }
            };
            Participant::new(id, name.clone())
        })
        .collect()
}
