//! Data models for Secret Santa rooms

mod participant;
mod room;

pub use participant::*;
pub use room::*;
