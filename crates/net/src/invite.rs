//! Shareable room links
//!
//! Link format: santa://<host>:<port>/<room-id>

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

const SCHEME: &str = "santa://";

/// Parsed room link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub host: IpAddr,
    pub port: u16,
    pub room_id: String,
}

impl RoomLink {
    pub fn new(addr: SocketAddr, room_id: impl Into<String>) -> Self {
        Self {
            host: addr.ip(),
            port: addr.port(),
            room_id: room_id.into(),
        }
    }

    /// Get the socket address for connection
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Format as URL string
    pub fn to_url(&self) -> String {
        format!("{}{}/{}", SCHEME, self.socket_addr(), self.room_id)
    }

    /// Parse from URL string
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::Protocol("Invalid room link: missing santa:// prefix".into()))?;

        let (host_port, room_id) = rest
            .split_once('/')
            .ok_or_else(|| Error::Protocol("Invalid room link: expected host:port/room-id".into()))?;

        let addr: SocketAddr = host_port.parse().map_err(|_| {
            Error::Protocol(format!("Invalid room link: bad address '{}'", host_port))
        })?;

        let room_id = room_id.trim_end_matches('/');
        if room_id.is_empty() || room_id.contains('/') {
            return Err(Error::Protocol(format!(
                "Invalid room link: bad room id '{}'",
                room_id
            )));
        }

        Ok(Self::new(addr, room_id))
    }
}

impl std::fmt::Display for RoomLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl FromStr for RoomLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
