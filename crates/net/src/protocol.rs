//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.
//! Clients send `Request`s; the server answers each with a `Response`
//! carrying the same id, and pushes `Event`s for subscribed rooms.

use serde::{Deserialize, Serialize};

use santa_core::{AssignOutcome, CreatedRoom, LocalParticipant, NewRoom, Room};

/// A client request, correlated with its response by `id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub op: Op,
}

/// Operations a client can ask for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    CreateRoom(NewRoom),
    GetRoom { room_id: String },
    UpdateRoomName { room_id: String, name: String },
    UpdateRoomParticipants { room_id: String, names: Vec<String> },
    ResetRoom { room_id: String },
    DeleteRoom { room_id: String },
    ListRooms,
    ListUserRooms { creator_id: String },
    VerifyPin { room_id: String, pin: String },
    Assign { room_id: String, participant_id: String },
    /// Look up a participant by name
    Identify { room_id: String, name: String },
    /// Start receiving `RoomChanged` events for a room
    Subscribe { room_id: String },
    Unsubscribe { room_id: String },
    Ping,
}

impl Op {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Op::CreateRoom(_) => "create_room",
            Op::GetRoom { .. } => "get_room",
            Op::UpdateRoomName { .. } => "update_room_name",
            Op::UpdateRoomParticipants { .. } => "update_room_participants",
            Op::ResetRoom { .. } => "reset_room",
            Op::DeleteRoom { .. } => "delete_room",
            Op::ListRooms => "list_rooms",
            Op::ListUserRooms { .. } => "list_user_rooms",
            Op::VerifyPin { .. } => "verify_pin",
            Op::Assign { .. } => "assign",
            Op::Identify { .. } => "identify",
            Op::Subscribe { .. } => "subscribe",
            Op::Unsubscribe { .. } => "unsubscribe",
            Op::Ping => "ping",
        }
    }
}

/// Successful response payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Created(CreatedRoom),
    Room(Option<Room>),
    Rooms(Vec<Room>),
    PinVerified(bool),
    Assigned(AssignOutcome),
    Participant(LocalParticipant),
    /// Subscription started; carries the room as it is now
    Subscribed(Option<Room>),
    Done,
    Pong,
}

/// Error categories sent across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RoomNotFound,
    UnknownParticipant,
    NoEligibleTargets,
    Validation,
    TransactionAborted,
    BadRequest,
    Internal,
}

/// A failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&santa_core::Error> for RemoteError {
    fn from(err: &santa_core::Error) -> Self {
        use santa_core::Error as E;

        let kind = match err {
            E::RoomNotFound(_) => ErrorKind::RoomNotFound,
            E::UnknownParticipant(_) => ErrorKind::UnknownParticipant,
            E::NoEligibleTargets => ErrorKind::NoEligibleTargets,
            E::Validation(_) => ErrorKind::Validation,
            E::TransactionAborted { .. } => ErrorKind::TransactionAborted,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<santa_core::Error> for RemoteError {
    fn from(err: santa_core::Error) -> Self {
        Self::from(&err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<Reply, RemoteError>,
}

/// Pushed to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A subscribed room changed; `None` once it is deleted
    RoomChanged { room_id: String, room: Option<Room> },
}

/// Everything the server writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ServerMessage {
    Response(Response),
    Event(Event),
}
