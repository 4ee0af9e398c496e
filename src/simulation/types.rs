//! Channel definitions shared by the simulation tasks.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::protocol::{ConnectionId, LinkEvent};

/// Depth of the operator line channel (stdin → coordinator task).
pub const OPERATOR_QUEUE_SIZE: usize = 8;
/// Bounded channel carrying operator lines to the coordinator.
pub type OperatorQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, String, OPERATOR_QUEUE_SIZE>;
/// Receiver side of the operator channel.
pub type OperatorQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, String, OPERATOR_QUEUE_SIZE>;
/// Sender side of the operator channel.
pub type OperatorQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, String, OPERATOR_QUEUE_SIZE>;

/// Depth of the coordinator's radio event queue. Every peer chunk passes through it,
/// so it is sized for several peers transmitting at once.
pub const RADIO_EVENT_QUEUE_SIZE: usize = 64;
/// Radio events (connect, disconnect, received chunk) delivered to the coordinator.
pub type RadioEventQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, LinkEvent, RADIO_EVENT_QUEUE_SIZE>;

/// Depth of one peer's downlink queue.
pub const DOWNLINK_QUEUE_SIZE: usize = 32;
/// Chunks addressed to one peer, tagged with the connection they were sent on.
pub type DownlinkQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, (ConnectionId, Vec<u8>), DOWNLINK_QUEUE_SIZE>;
