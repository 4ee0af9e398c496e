//! Protocol layer shared by the coordinator and peer roles.
//!
//! - `link`: the transport boundary (connection ids, link events, byte-level traits)
//! - `chunked`: fragmentation of outgoing messages and reassembly of incoming chunks
//! - `message`: the JSON wire encoding of telemetry reports and control commands

pub mod chunked;
pub mod link;
pub mod message;

pub use chunked::{ChunkSender, FRAME_TERMINATOR, Reassembler, TxState};
pub use link::{ByteLink, ConnectionId, ConnectionSink, CoordinatorLink, LinkEvent, PeerLink};
pub use message::{CommandUpdate, ControlCommand, DEFAULT_TEMP_THRESHOLD, TelemetryReport, TelemetryUpdate};
