//! Assignment engine - draws a gift target for one participant
//!
//! The whole draw (read the room, compute who is still eligible, pick one at
//! random, write the result) runs inside a single-document transaction. When
//! another participant commits first, the draw is recomputed from the fresher
//! room, so two concurrent pickers can never claim the same target and one
//! participant can never end up with two assignments.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::ids;
use crate::invariants::assert_room_invariants;
use crate::models::{Assignment, Room};
use crate::store::{transact, DocumentStore, RetryPolicy, ROOMS};

/// What a successful `assign` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    /// A new assignment was committed
    Assigned,
    /// The participant had already drawn; nothing changed
    AlreadyAssigned,
}

/// Decide the draw for `participant_id` against one consistent view of the room
///
/// Returns `None` when the participant already has an assignment.
pub fn draw<R: Rng + ?Sized>(
    room: &Room,
    participant_id: &str,
    rng: &mut R,
    now_ms: i64,
) -> Result<Option<Assignment>> {
    if !room.participants.contains_key(participant_id) {
        return Err(Error::UnknownParticipant(participant_id.to_string()));
    }

    if room.has_assignment(participant_id) {
        return Ok(None);
    }

    let eligible = room.eligible_targets(participant_id);
    let target = eligible.choose(rng).ok_or(Error::NoEligibleTargets)?;

    Ok(Some(Assignment::new(
        participant_id.to_string(),
        (*target).to_string(),
        now_ms,
    )))
}

/// Runs draws against rooms held in a document store
pub struct AssignmentEngine<S: ?Sized> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S: DocumentStore + ?Sized> AssignmentEngine<S> {
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

    /// Assign a target to a participant
    ///
    /// Idempotent: once the participant has drawn, further calls succeed
    /// without changing anything. The target itself is not returned; read or
    /// subscribe to the room to learn it.
    pub fn assign(&self, room_id: &str, participant_id: &str) -> Result<AssignOutcome> {
        self.assign_with_rng(room_id, participant_id, &mut rand::thread_rng())
    }

    /// `assign` with a caller-supplied random source
    #[instrument(skip(self, rng))]
    pub fn assign_with_rng<R: Rng + ?Sized>(
        &self,
        room_id: &str,
        participant_id: &str,
        rng: &mut R,
    ) -> Result<AssignOutcome> {
        let mut outcome = AssignOutcome::AlreadyAssigned;

        let result = transact(
            self.store.as_ref(),
            ROOMS,
            room_id,
            self.policy,
            |current| {
                let value = current.ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;
                let mut room = Room::from_document(room_id, value.clone())?;

                match draw(&room, participant_id, rng, ids::now_millis())? {
                    None => {
                        outcome = AssignOutcome::AlreadyAssigned;
                        Ok(None)
                    }
                    Some(assignment) => {
                        room.apply_assignment(assignment);
                        assert_room_invariants(&room);
                        outcome = AssignOutcome::Assigned;
                        Ok(Some(room.to_document()?))
                    }
                }
            },
        );

        match result {
            Ok(_) => {
                info!(?outcome, "Draw finished");
                Ok(outcome)
            }
            Err(e) if e.is_user_facing() => {
                info!(error = %e, "Draw rejected");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Draw failed");
                Err(e)
            }
        }
    }
}
