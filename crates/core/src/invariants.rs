//! Developer guardrails and invariants
//!
//! `room_violations` reports every way a room document is inconsistent.
//! `assert_room_invariants` turns those into debug assertions that are
//! compiled out in release builds.

use std::collections::BTreeSet;

use crate::models::{Room, RoomStatus};

/// Describe every invariant the room currently breaks (empty when consistent)
pub fn room_violations(room: &Room) -> Vec<String> {
    let mut violations = Vec::new();

    let participant_ids: BTreeSet<&str> = room.participants.keys().map(String::as_str).collect();
    let target_keys: BTreeSet<&str> = room
        .available_targets
        .keys()
        .map(String::as_str)
        .collect();

    if participant_ids != target_keys {
        violations.push(format!(
            "availableTargets keys {:?} differ from participants {:?}",
            target_keys, participant_ids
        ));
    }

    for (id, participant) in &room.participants {
        if &participant.id != id {
            violations.push(format!(
                "participant keyed {} carries id {}",
                id, participant.id
            ));
        }
    }

    let mut claimed = BTreeSet::new();
    for (picker, assignment) in &room.assignments {
        if &assignment.participant_id != picker {
            violations.push(format!(
                "assignment keyed {} belongs to {}",
                picker, assignment.participant_id
            ));
        }
        if !room.participants.contains_key(picker) {
            violations.push(format!("assignment for unknown participant {}", picker));
        }
        if assignment.target_id == assignment.participant_id {
            violations.push(format!("{} is assigned to themselves", picker));
        }
        if !claimed.insert(assignment.target_id.as_str()) {
            violations.push(format!(
                "target {} is assigned more than once",
                assignment.target_id
            ));
        }
    }

    for (id, available) in &room.available_targets {
        let is_claimed = claimed.contains(id.as_str());
        if *available == is_claimed {
            violations.push(format!(
                "target {} available={} but claimed={}",
                id, available, is_claimed
            ));
        }
    }

    let full = room.assignments.len() == room.participants.len();
    match room.status {
        RoomStatus::Completed if !full => violations.push(format!(
            "room completed with {} of {} assignments",
            room.assignments.len(),
            room.participants.len()
        )),
        RoomStatus::Open if full && !room.participants.is_empty() => {
            violations.push("every participant has drawn but room is still open".to_string())
        }
        _ => {}
    }

    violations
}

/// Validate that a room's state is internally consistent
pub fn assert_room_invariants(room: &Room) {
    let violations = room_violations(room);
    debug_assert!(
        violations.is_empty(),
        "Room {} is inconsistent: {}",
        room.id,
        violations.join("; ")
    );
}
