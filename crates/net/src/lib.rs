//! Santa Network Library
//!
//! Serves the room repository and assignment engine over TCP.
//!
//! # Architecture
//!
//! - **Server**: Owns the document store, answers requests, pushes room changes
//! - **Client**: Sends typed requests and receives subscription events
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(addr, store, RetryPolicy::default()).await?;
//!
//! let mut client = Client::connect(server.addr()).await?;
//! let created = client.create_room(new_room).await?;
//! client.subscribe(&created.room_id).await?;
//!
//! while let Some(Event::RoomChanged { room, .. }) = client.next_event().await {
//!     /* redraw */
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod invite;
pub mod protocol;
pub mod server;

pub use client::{Client, ConnectionState};
pub use error::{Error, Result};
pub use invite::RoomLink;
pub use protocol::{ErrorKind, Event, Op, RemoteError, Reply, Request, Response, ServerMessage};
pub use server::Server;

pub use santa_core::config::DEFAULT_PORT;
