//! Peer role: connection lifecycle, sampling and local heater control.

pub mod hardware;
pub mod state_machine;

pub use hardware::{Actuator, Sensor};
pub use state_machine::{LinkState, PeerNode, derive_peer_name};
