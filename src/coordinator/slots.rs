//! Fixed-capacity slot table mapping live connections to peer state.
//!
//! Slots are values in a `Vec` sized once at construction and addressed by index.
//! Occupancy is an explicit flag; a freed slot is reset in place. All mutation
//! happens under one coarse lock, so an event handler and the periodic tick never see
//! a half-updated table.

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use std::cell::RefCell;
use std::collections::HashSet;

use crate::error::ProtocolError;
use crate::protocol::{ConnectionId, Reassembler, TelemetryReport, TelemetryUpdate};

/// Last-known state of a peer: the fields of every report it sent, merged.
pub type PeerState = TelemetryReport;

#[derive(Debug, Clone)]
struct Slot {
    connection: Option<ConnectionId>,
    occupied: bool,
    peer: PeerState,
    reassembler: Reassembler,
}

impl Slot {
    fn empty(max_message_len: usize) -> Self {
        Self {
            connection: None,
            occupied: false,
            peer: PeerState::default(),
            reassembler: Reassembler::new(max_message_len),
        }
    }

    fn clear(&mut self) {
        self.connection = None;
        self.occupied = false;
        self.peer = PeerState::default();
        self.reassembler.reset();
    }

    fn is_bound_to(&self, id: ConnectionId) -> bool {
        self.occupied && self.connection == Some(id)
    }
}

/// Copy of one slot for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSnapshot {
    pub index: usize,
    pub connection: Option<ConnectionId>,
    pub peer: PeerState,
}

#[derive(Debug)]
struct SlotTable {
    slots: Vec<Slot>,
    occupied_count: usize,
}

impl SlotTable {
    fn find(&mut self, id: ConnectionId) -> Option<(usize, &mut Slot)> {
        self.slots.iter_mut().enumerate().find(|(_, slot)| slot.is_bound_to(id))
    }
}

pub struct SlotManager {
    capacity: usize,
    table: BlockingMutex<CriticalSectionRawMutex, RefCell<SlotTable>>,
}

impl SlotManager {
    pub fn new(capacity: usize, max_message_len: usize) -> Self {
        let table = SlotTable {
            slots: (0..capacity).map(|_| Slot::empty(max_message_len)).collect(),
            occupied_count: 0,
        };
        Self {
            capacity,
            table: BlockingMutex::new(RefCell::new(table)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupied_count(&self) -> usize {
        self.table.lock(|table| table.borrow().occupied_count)
    }

    /// Admit a connection into the first free slot.
    ///
    /// A connection id that is already bound is re-admitted into its own slot with a
    /// fresh peer state, keeping ids unique. Returns the slot index, or
    /// `CapacityExceeded` when every slot is taken.
    pub fn on_connect(&self, id: ConnectionId) -> Result<usize, ProtocolError> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();

            if let Some((index, slot)) = table.find(id) {
                log::warn!("Connection {} admitted twice, resetting slot {}", id, index);
                slot.clear();
                slot.connection = Some(id);
                slot.occupied = true;
                return Ok(index);
            }

            if table.occupied_count >= self.capacity {
                return Err(ProtocolError::CapacityExceeded { capacity: self.capacity });
            }

            let index = table
                .slots
                .iter()
                .position(|slot| !slot.occupied)
                .ok_or(ProtocolError::CapacityExceeded { capacity: self.capacity })?;
            let slot = &mut table.slots[index];
            slot.connection = Some(id);
            slot.occupied = true;
            table.occupied_count += 1;
            Ok(index)
        })
    }

    /// Release the slot bound to `id`. Unknown ids are a no-op.
    pub fn on_disconnect(&self, id: ConnectionId) -> Option<usize> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let (index, slot) = table.find(id)?;
            slot.clear();
            table.occupied_count -= 1;
            Some(index)
        })
    }

    /// Feed a received chunk into the reassembly buffer of the slot bound to `id`.
    pub fn on_bytes(&self, id: ConnectionId, chunk: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let (_, slot) = table.find(id).ok_or(ProtocolError::UnknownConnection(id))?;
            slot.reassembler.push(chunk)
        })
    }

    /// Merge a decoded report into the peer state of the slot bound to `id`.
    pub fn on_telemetry(&self, id: ConnectionId, update: &TelemetryUpdate) -> Result<usize, ProtocolError> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let (index, slot) = table.find(id).ok_or(ProtocolError::UnknownConnection(id))?;
            update.apply_to(&mut slot.peer);
            Ok(index)
        })
    }

    pub fn peer(&self, id: ConnectionId) -> Option<PeerState> {
        self.table.lock(|table| table.borrow_mut().find(id).map(|(_, slot)| slot.peer.clone()))
    }

    /// `(slot index, connection)` of every occupied slot, in slot order.
    pub fn occupied(&self) -> Vec<(usize, ConnectionId)> {
        self.table.lock(|table| {
            table
                .borrow()
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.occupied)
                .filter_map(|(index, slot)| slot.connection.map(|id| (index, id)))
                .collect()
        })
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.table.lock(|table| {
            table
                .borrow()
                .slots
                .iter()
                .enumerate()
                .map(|(index, slot)| SlotSnapshot {
                    index,
                    connection: if slot.occupied { slot.connection } else { None },
                    peer: slot.peer.clone(),
                })
                .collect()
        })
    }

    /// Verify the table invariants: the counter matches the occupied flags, every
    /// occupied slot has a connection, and no connection is bound twice.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.table.lock(|table| {
            let table = table.borrow();
            let occupied = table.slots.iter().filter(|slot| slot.occupied).count();
            if occupied != table.occupied_count {
                return Err(format!("occupied_count {} but {} slots occupied", table.occupied_count, occupied));
            }
            if occupied > self.capacity {
                return Err(format!("{} slots occupied beyond capacity {}", occupied, self.capacity));
            }
            let mut seen = HashSet::new();
            for (index, slot) in table.slots.iter().enumerate().filter(|(_, slot)| slot.occupied) {
                let id = slot.connection.ok_or_else(|| format!("slot {} occupied without connection", index))?;
                if !seen.insert(id) {
                    return Err(format!("connection {} bound to more than one slot", id));
                }
            }
            Ok(())
        })
    }
}
