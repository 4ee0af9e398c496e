//! In-memory radio connecting one coordinator to a set of peers.
//!
//! Each peer owns a link slot in the radio. Connecting allocates the smallest
//! connection id not currently in use (ids are reused, as on a real BLE stack) and
//! queues `LinkEvent::Connected` for the coordinator. Chunks travel through bounded
//! queues:
//!
//! - peer → coordinator: the shared event queue; a peer waits when it is full.
//! - coordinator → peer: one downlink queue per peer; a full queue rejects the write
//!   with `LinkError::Congested` so the coordinator never waits on a peer.
//!
//! Downlink chunks carry the connection id they were sent on. A peer discards chunks
//! from an earlier connection when it reads its queue.

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use std::cell::RefCell;

use crate::config::MAX_RADIO_LINKS;
use crate::error::LinkError;
use crate::protocol::{ByteLink, ConnectionId, CoordinatorLink, LinkEvent, PeerLink};

use super::types::{DownlinkQueue, RadioEventQueue};

pub struct SimulatedRadio {
    address: String,
    max_payload: usize,
    events: RadioEventQueue,
    /// Current connection of each peer, by peer index.
    links: BlockingMutex<CriticalSectionRawMutex, RefCell<Vec<Option<ConnectionId>>>>,
    downlinks: Vec<DownlinkQueue>,
}

impl SimulatedRadio {
    /// # Parameters
    /// - `address`: the coordinator's advertised address; peers must connect to it.
    /// - `peer_count`: number of peer link slots.
    /// - `max_payload`: largest write the radio accepts, in bytes.
    pub fn new(address: &str, peer_count: usize, max_payload: usize) -> Self {
        Self {
            address: address.to_string(),
            max_payload,
            events: RadioEventQueue::new(),
            links: BlockingMutex::new(RefCell::new(vec![None; peer_count])),
            downlinks: (0..peer_count).map(|_| DownlinkQueue::new()).collect(),
        }
    }

    pub fn coordinator(&self) -> CoordinatorRadio<'_> {
        CoordinatorRadio { radio: self }
    }

    pub fn peer(&self, index: usize) -> PeerRadio<'_> {
        PeerRadio { radio: self, index }
    }

    pub fn connection(&self, index: usize) -> Option<ConnectionId> {
        self.links.lock(|links| links.borrow().get(index).copied().flatten())
    }

    pub fn live_links(&self) -> usize {
        self.links.lock(|links| links.borrow().iter().flatten().count())
    }

    /// Break the link of peer `index` as if the radio lost it.
    pub async fn drop_link(&self, index: usize) {
        if let Some(id) = self.release(index) {
            log::info!("Radio link {} of peer {} dropped", id, index);
            self.events.send(LinkEvent::Disconnected(id)).await;
        }
    }

    fn check_payload(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if bytes.len() > self.max_payload {
            return Err(LinkError::PayloadTooLarge {
                len: bytes.len(),
                max: self.max_payload,
            });
        }
        Ok(())
    }

    async fn open(&self, index: usize, address: &str) -> Result<ConnectionId, LinkError> {
        if address != self.address {
            return Err(LinkError::ConnectFailed(address.to_string()));
        }
        if let Some(id) = self.release(index) {
            self.events.send(LinkEvent::Disconnected(id)).await;
        }

        let id = self.links.lock(|links| {
            let mut links = links.borrow_mut();
            if index >= links.len() || links.iter().flatten().count() >= MAX_RADIO_LINKS {
                return Err(LinkError::ConnectFailed(address.to_string()));
            }
            let id = (1..=u16::MAX)
                .map(ConnectionId)
                .find(|id| !links.contains(&Some(*id)))
                .ok_or_else(|| LinkError::ConnectFailed(address.to_string()))?;
            links[index] = Some(id);
            Ok(id)
        })?;

        self.events.send(LinkEvent::Connected(id)).await;
        Ok(id)
    }

    fn release(&self, index: usize) -> Option<ConnectionId> {
        self.links.lock(|links| links.borrow_mut().get_mut(index).and_then(Option::take))
    }

    fn release_connection(&self, id: ConnectionId) -> bool {
        self.links.lock(|links| {
            let mut links = links.borrow_mut();
            match links.iter_mut().find(|link| **link == Some(id)) {
                Some(link) => {
                    *link = None;
                    true
                }
                None => false,
            }
        })
    }
}

/// Coordinator's handle on the radio.
pub struct CoordinatorRadio<'a> {
    radio: &'a SimulatedRadio,
}

impl CoordinatorRadio<'_> {
    /// Wait for the next link event.
    pub async fn next_event(&self) -> LinkEvent {
        self.radio.events.receive().await
    }

    pub fn try_next_event(&self) -> Option<LinkEvent> {
        self.radio.events.try_receive().ok()
    }
}

impl CoordinatorLink for CoordinatorRadio<'_> {
    async fn send(&self, id: ConnectionId, bytes: &[u8]) -> Result<(), LinkError> {
        self.radio.check_payload(bytes)?;
        let index = self
            .radio
            .links
            .lock(|links| links.borrow().iter().position(|link| *link == Some(id)))
            .ok_or(LinkError::NotConnected)?;
        self.radio.downlinks[index].try_send((id, bytes.to_vec())).map_err(|_| LinkError::Congested)
    }

    async fn disconnect(&self, id: ConnectionId) {
        if self.radio.release_connection(id) {
            // The coordinator drains this queue itself, so it must not wait here.
            if self.radio.events.try_send(LinkEvent::Disconnected(id)).is_err() {
                log::warn!("Radio event queue full, disconnect of {} not reported", id);
            }
        }
    }
}

/// One peer's handle on the radio.
pub struct PeerRadio<'a> {
    radio: &'a SimulatedRadio,
    index: usize,
}

impl PeerRadio<'_> {
    /// Wait for the next chunk sent to this peer on its current connection.
    pub async fn receive(&self) -> Vec<u8> {
        loop {
            let (id, bytes) = self.radio.downlinks[self.index].receive().await;
            if self.radio.connection(self.index) == Some(id) {
                return bytes;
            }
            log::trace!("Peer {} discarding chunk from stale connection {}", self.index, id);
        }
    }

    /// Next pending chunk on the current connection, without waiting.
    pub fn try_receive(&self) -> Option<Vec<u8>> {
        while let Ok((id, bytes)) = self.radio.downlinks[self.index].try_receive() {
            if self.radio.connection(self.index) == Some(id) {
                return Some(bytes);
            }
        }
        None
    }

    pub async fn drop_link(&self) {
        self.radio.drop_link(self.index).await;
    }

    fn current(&self) -> Result<ConnectionId, LinkError> {
        self.radio.connection(self.index).ok_or(LinkError::NotConnected)
    }
}

impl ByteLink for PeerRadio<'_> {
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        self.radio.check_payload(bytes)?;
        let id = self.current()?;
        self.radio.events.send(LinkEvent::BytesReceived(id, bytes.to_vec())).await;
        Ok(())
    }
}

impl PeerLink for PeerRadio<'_> {
    async fn connect(&self, address: &str) -> Result<(), LinkError> {
        self.radio.open(self.index, address).await.map(|_| ())
    }

    async fn discover(&self) -> Result<(), LinkError> {
        self.current().map(|_| ()).map_err(|_| LinkError::ServiceNotFound)
    }

    async fn subscribe(&self) -> Result<(), LinkError> {
        self.current().map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.radio.connection(self.index).is_some()
    }

    async fn disconnect(&self) {
        if let Some(id) = self.radio.release(self.index) {
            self.radio.events.send(LinkEvent::Disconnected(id)).await;
        }
    }
}
