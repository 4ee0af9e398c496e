//! Transport boundary consumed by the protocol core.
//!
//! The concrete radio stack (advertising, service discovery, connection setup) lives
//! behind these traits. The core only ever hands a link at most `chunk-size` bytes per
//! write.

use std::fmt;

use crate::error::LinkError;

/// Transport-assigned identifier of one live link. Reused by the transport after the
/// link closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u16);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events the coordinator's transport delivers, one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    BytesReceived(ConnectionId, Vec<u8>),
}

/// A single write primitive. One call is one radio transmission.
#[allow(async_fn_in_trait)]
pub trait ByteLink {
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError>;
}

/// Coordinator side of the radio: addressed writes and forced disconnects.
#[allow(async_fn_in_trait)]
pub trait CoordinatorLink {
    async fn send(&self, id: ConnectionId, bytes: &[u8]) -> Result<(), LinkError>;

    /// Drop a connection. The transport later reports `LinkEvent::Disconnected` for it.
    async fn disconnect(&self, id: ConnectionId);
}

/// Peer side of the radio: one link to the single known coordinator.
#[allow(async_fn_in_trait)]
pub trait PeerLink: ByteLink {
    async fn connect(&self, address: &str) -> Result<(), LinkError>;

    /// Resolve the coordinator's send/receive endpoints on an established link.
    async fn discover(&self) -> Result<(), LinkError>;

    /// Register for incoming command notifications.
    async fn subscribe(&self) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self);
}

/// Binds a coordinator link to one connection so it can feed a `ChunkSender`.
pub struct ConnectionSink<'a, L> {
    link: &'a L,
    id: ConnectionId,
}

impl<'a, L: CoordinatorLink> ConnectionSink<'a, L> {
    pub fn new(link: &'a L, id: ConnectionId) -> Self {
        Self { link, id }
    }
}

impl<L: CoordinatorLink> ByteLink for ConnectionSink<'_, L> {
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.link.send(self.id, bytes).await
    }
}
