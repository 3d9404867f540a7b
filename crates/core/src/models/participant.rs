//! Participant and assignment models

use serde::{Deserialize, Serialize};

/// A person taking part in a gift exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The outcome of one draw: `participant_id` gives a gift to `target_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub participant_id: String,
    pub target_id: String,
    /// Epoch milliseconds
    pub assigned_at: i64,
}

impl Assignment {
    pub fn new(participant_id: String, target_id: String, assigned_at: i64) -> Self {
        Self {
            participant_id,
            target_id,
            assigned_at,
        }
    }
}

/// Identity a client remembers for a room it has joined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalParticipant {
    pub participant_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}
