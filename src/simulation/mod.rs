//! Single-process host for a complete star network.
//!
//! One coordinator and every configured peer run as async tasks on one thread, joined
//! by an in-memory radio. Peers sense a simulated room and drive a simulated heater.
//!
//! ## Module Organization
//!
//! - `clock`: scalable time driver behind `embassy_time`
//! - `types`: channel definitions
//! - `radio`: in-memory radio with connection ids, queues and link-drop injection
//! - `board`: sensor and heater model
//! - `network_task`: coordinator event loop
//! - `node_task`: per-peer event loop

pub mod board;
pub mod clock;
pub mod network_task;
pub mod node_task;
pub mod radio;
pub mod types;

use embassy_futures::join::join;
use embassy_time::Duration;
use futures::executor::block_on;
use futures::future::join_all;

use crate::config::NetworkConfig;
use crate::coordinator::Coordinator;
use crate::peer::PeerNode;

pub use board::SimulatedBoard;
pub use radio::{CoordinatorRadio, PeerRadio, SimulatedRadio};
pub use types::{OperatorQueue, OperatorQueueReceiver, OperatorQueueSender};

/// Build the network described by `config` and run it on the calling thread.
///
/// Never returns; the tasks run for the lifetime of the process.
pub fn run_network(config: &NetworkConfig, operator_rx: OperatorQueueReceiver) {
    clock::set_speed_percent(config.simulation.speed_percent);

    let simulation = &config.simulation;
    let radio = SimulatedRadio::new(&config.coordinator.address, simulation.peers.len(), simulation.max_payload);
    let coordinator = Coordinator::new(radio.coordinator(), &config.coordinator, &config.transport);

    let peers = simulation.peers.iter().enumerate().map(|(index, peer)| {
        let node = PeerNode::new(radio.peer(index), SimulatedBoard::new(peer), peer.device_id, &config.coordinator.address, &config.peer, &config.transport);
        node_task::peer_task(node, &config.peer, peer.device_id, simulation.link_drop_probability)
    });

    log::info!(
        "Starting network: {} peer(s), capacity {}, chunk size {}, speed {}%",
        simulation.peers.len(),
        config.coordinator.capacity,
        config.transport.chunk_size,
        simulation.speed_percent
    );

    let poll_interval = Duration::from_millis(config.coordinator.poll_interval_ms);
    block_on(join(network_task::coordinator_task(&coordinator, operator_rx, poll_interval), join_all(peers)));
}
