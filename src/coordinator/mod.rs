//! Coordinator role: slot table and the synchronization protocol that drives it.

pub mod slots;
pub mod sync;

pub use slots::{PeerState, SlotManager, SlotSnapshot};
pub use sync::Coordinator;
