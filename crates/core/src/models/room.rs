//! Room model - one document per gift exchange

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Assignment, Participant};
use crate::error::Result;

/// Room lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Some participants have not drawn yet
    #[default]
    Open,
    /// Every participant has an assignment
    Completed,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Open => "open",
            RoomStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Secret Santa room
///
/// `id` is the store key and is not part of the stored document body.
/// `assignments` and `available_targets` may be missing from older documents
/// and deserialize as empty maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Epoch milliseconds
    pub created_at: i64,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub is_secured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(default)]
    pub participants: BTreeMap<String, Participant>,
    #[serde(default)]
    pub assignments: BTreeMap<String, Assignment>,
    #[serde(default)]
    pub available_targets: BTreeMap<String, bool>,
}

impl Room {
    /// Build an open room where every participant is still available as a target
    pub fn new(name: String, participants: Vec<Participant>, created_at: i64) -> Self {
        let mut room = Self {
            id: String::new(),
            name,
            created_at,
            status: RoomStatus::Open,
            creator_id: None,
            is_secured: false,
            pin: None,
            participants: BTreeMap::new(),
            assignments: BTreeMap::new(),
            available_targets: BTreeMap::new(),
        };
        room.replace_participants(participants);
        room
    }

    pub fn with_creator(mut self, creator_id: String) -> Self {
        self.creator_id = Some(creator_id);
        self
    }

    pub fn with_pin(mut self, pin: String) -> Self {
        self.is_secured = true;
        self.pin = Some(pin);
        self
    }

    /// Decode a stored document, attaching the store key as the id
    ///
    /// Participants missing from `availableTargets` are filled in as
    /// available unless an assignment already targets them.
    pub fn from_document(id: &str, value: Value) -> Result<Self> {
        let mut room: Room = serde_json::from_value(value)?;
        room.id = id.to_string();
        room.fill_missing_targets();
        Ok(room)
    }

    fn fill_missing_targets(&mut self) {
        for participant_id in self.participants.keys() {
            if self.available_targets.contains_key(participant_id) {
                continue;
            }
            let claimed = self
                .assignments
                .values()
                .any(|a| &a.target_id == participant_id);
            self.available_targets
                .insert(participant_id.clone(), !claimed);
        }
    }

    /// Encode for storage; the id lives in the key, not the body
    pub fn to_document(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("id");
        }
        Ok(value)
    }

    pub fn assigned_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_completed(&self) -> bool {
        self.status == RoomStatus::Completed
    }

    pub fn has_assignment(&self, participant_id: &str) -> bool {
        self.assignments.contains_key(participant_id)
    }

    /// Targets `picker` could draw right now: unclaimed and not themselves
    pub fn eligible_targets(&self, picker: &str) -> Vec<&str> {
        self.available_targets
            .iter()
            .filter(|(id, available)| **available && id.as_str() != picker)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Record a draw, claim its target and complete the room when everyone has drawn
    pub fn apply_assignment(&mut self, assignment: Assignment) {
        self.available_targets
            .insert(assignment.target_id.clone(), false);
        self.assignments
            .insert(assignment.participant_id.clone(), assignment);

        if self.assignments.len() == self.participants.len() {
            self.status = RoomStatus::Completed;
        }
    }

    /// Clear every draw and make all participants available again
    pub fn reset_assignments(&mut self) {
        self.assignments.clear();
        self.available_targets = self
            .participants
            .keys()
            .map(|id| (id.clone(), true))
            .collect();
        self.status = RoomStatus::Open;
    }

    /// Swap in a new participant list; any previous draws are void
    pub fn replace_participants(&mut self, participants: Vec<Participant>) {
        self.participants = participants
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        self.reset_assignments();
    }

    /// Find a participant ID by name (case-insensitive, surrounding whitespace ignored)
    pub fn find_participant_id_by_name(&self, name: &str) -> Option<&str> {
        let normalized = name.trim().to_lowercase();
        self.participants
            .values()
            .find(|p| p.name.to_lowercase() == normalized)
            .map(|p| p.id.as_str())
    }

    /// Name of the person `participant_id` gives a gift to, once drawn
    pub fn target_name(&self, participant_id: &str) -> Option<&str> {
        let assignment = self.assignments.get(participant_id)?;
        self.participants
            .get(&assignment.target_id)
            .map(|p| p.name.as_str())
    }
}
