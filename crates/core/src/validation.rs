//! Input validation for room names, participant lists and PINs

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ids::PIN_LENGTH;

/// Fewest participants a gift exchange can have
pub const MIN_PARTICIPANTS: usize = 2;

/// Split a newline-separated participant list, dropping blank lines
pub fn parse_participant_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Trimmed, non-empty room name
pub fn validate_room_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("Room name cannot be empty".into()));
    }
    Ok(trimmed.to_string())
}

/// Trim names and require at least two, unique ignoring case
pub fn validate_participant_names(names: &[String]) -> Result<Vec<String>> {
    let names: Vec<String> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();

    if names.len() < MIN_PARTICIPANTS {
        return Err(Error::Validation(format!(
            "At least {} participants are required",
            MIN_PARTICIPANTS
        )));
    }

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.to_lowercase()) {
            return Err(Error::Validation(format!(
                "Duplicate participant name: {}",
                name
            )));
        }
    }

    Ok(names)
}

/// A PIN is exactly four ASCII digits
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() != PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation(format!(
            "PIN must be exactly {} digits",
            PIN_LENGTH
        )));
    }
    Ok(())
}
