//! Error types for Santa Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Participant {0} is not part of this room")]
    UnknownParticipant(String),

    #[error("No valid targets available")]
    NoEligibleTargets,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Transaction aborted after {attempts} conflicting attempts")]
    TransactionAborted { attempts: u32 },

    #[error("Document store closed")]
    StoreClosed,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Business-rule failures that a user can act on, as opposed to
    /// infrastructure faults
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::RoomNotFound(_)
                | Error::UnknownParticipant(_)
                | Error::NoEligibleTargets
                | Error::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
