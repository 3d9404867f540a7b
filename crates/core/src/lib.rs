//! Santa Core Library
//!
//! Room models, the assignment engine, and the document stores rooms live in.

pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod invariants;
pub mod models;
pub mod repository;
pub mod store;
pub mod subscription;
pub mod validation;

pub use config::{Config, ConfigError, StoreBackend};
pub use engine::{AssignOutcome, AssignmentEngine};
pub use error::{Error, Result};
pub use models::*;
pub use repository::{CreatedRoom, NewRoom, RoomRepository};
pub use store::{DocumentStore, MemoryStore, RetryPolicy, SqliteStore};
pub use subscription::{RoomSubscription, RoomsSubscription};
