//! Error types shared by the coordinator and peer roles.
//!
//! Every variant here is recovered locally by the node that observes it; none of them
//! stops an event loop. Bootstrap failures use `anyhow` instead.

use thiserror::Error;

use crate::protocol::ConnectionId;

/// Protocol-level failures observed while serving a connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Admission refused because every slot is occupied.
    #[error("capacity exceeded: all {capacity} slots occupied")]
    CapacityExceeded { capacity: usize },
    /// Payload failed structural or field validation.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// Event for a connection that has no slot (expected around disconnects).
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// Reassembly buffer grew past its bound without a terminator.
    #[error("stream overflow: {len} bytes buffered without terminator (max {max})")]
    StreamOverflow { len: usize, max: usize },
    /// Sensor returned NaN; the sentinel reading is used instead.
    #[error("sensor read invalid")]
    SensorReadInvalid,
}

/// Failures reported by the radio link collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("link not connected")]
    NotConnected,
    #[error("payload of {len} bytes exceeds link maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("connection to {0} failed")]
    ConnectFailed(String),
    #[error("remote service or endpoints not found")]
    ServiceNotFound,
    #[error("link queue full")]
    Congested,
}

/// Failures of a chunked send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Another multi-chunk send is in progress on this transport.
    #[error("transport busy with another send")]
    Busy,
    /// The payload contains the frame terminator and cannot be framed.
    #[error("payload contains the frame terminator at offset {0}")]
    EmbeddedTerminator(usize),
    /// A single chunk write did not complete within the send timeout.
    #[error("chunk write timed out after {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Link(#[from] LinkError),
}
