//! Star-topology sensor network over a low-bandwidth radio.
//!
//! A coordinator holds a fixed number of peer slots and pushes one heater policy to
//! every peer. Peers sample temperature and humidity, drive a heater locally and report
//! back. Messages are JSON objects framed by a newline terminator and split into
//! radio-sized chunks.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod simulation;
