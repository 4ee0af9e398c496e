//! End-to-end scenarios over the in-memory radio.

use futures::executor::block_on;
use std::path::Path;

use thermolink::config::{CoordinatorConfig, NetworkConfig, PeerConfig, SimulatedPeerConfig, TransportConfig};
use thermolink::coordinator::Coordinator;
use thermolink::error::{LinkError, TransportError};
use thermolink::peer::{LinkState, PeerNode};
use thermolink::protocol::{ChunkSender, CommandUpdate, ConnectionId, ConnectionSink, ControlCommand, CoordinatorLink, PeerLink, Reassembler};
use thermolink::simulation::types::DOWNLINK_QUEUE_SIZE;
use thermolink::simulation::{CoordinatorRadio, PeerRadio, SimulatedBoard, SimulatedRadio};

const ADDRESS: &str = "hub";

fn transport() -> TransportConfig {
    TransportConfig {
        pacing_ms: 0,
        ..TransportConfig::default()
    }
}

fn coordinator(radio: &SimulatedRadio) -> Coordinator<CoordinatorRadio<'_>> {
    Coordinator::new(radio.coordinator(), &CoordinatorConfig::default(), &transport())
}

fn peer(radio: &SimulatedRadio, index: usize, ambient: f32) -> PeerNode<PeerRadio<'_>, SimulatedBoard> {
    let board = SimulatedBoard::new(&SimulatedPeerConfig {
        device_id: 0x1000 + index as u64,
        ambient,
        noise_sigma: 0.0,
        read_failure_probability: 0.0,
        ..SimulatedPeerConfig::default()
    });
    PeerNode::new(radio.peer(index), board, 0x1000 + index as u64, ADDRESS, &PeerConfig::default(), &transport())
}

/// Deliver every queued radio event to the coordinator.
async fn pump(coordinator: &Coordinator<CoordinatorRadio<'_>>) {
    while let Some(event) = coordinator.link().try_next_event() {
        coordinator.handle_event(event).await;
    }
}

/// Deliver every queued downlink chunk to the peer.
fn deliver(node: &mut PeerNode<PeerRadio<'_>, SimulatedBoard>) {
    while let Some(chunk) = node.link().try_receive() {
        let _ = node.on_bytes(&chunk);
    }
}

#[test]
fn scenario_a_fourth_peer_is_rejected() {
    let radio = SimulatedRadio::new(ADDRESS, 4, 20);
    let coordinator = coordinator(&radio);

    block_on(async {
        for index in 0..4 {
            radio.peer(index).connect(ADDRESS).await.unwrap();
        }
        pump(&coordinator).await;
    });

    assert_eq!(coordinator.slots().occupied_count(), 3);
    assert_eq!(coordinator.slots().occupied().len(), 3);
    coordinator.slots().check_invariants().unwrap();
    assert!(!radio.peer(3).is_connected());
    assert_eq!(radio.live_links(), 3);
}

#[test]
fn scenario_a_rejected_peer_gets_in_after_a_slot_frees() {
    let radio = SimulatedRadio::new(ADDRESS, 4, 20);
    let coordinator = coordinator(&radio);
    let mut nodes: Vec<_> = (0..4).map(|index| peer(&radio, index, 20.0)).collect();

    block_on(async {
        for node in nodes.iter_mut() {
            node.tick().await;
        }
        pump(&coordinator).await;
        assert_eq!(coordinator.slots().occupied_count(), 3);

        radio.drop_link(0).await;
        pump(&coordinator).await;

        nodes[3].tick().await;
        pump(&coordinator).await;
    });

    assert_eq!(coordinator.slots().occupied_count(), 3);
    assert_eq!(nodes[3].state(), LinkState::Ready);
    let names: Vec<String> = coordinator.slots().snapshot().into_iter().map(|slot| slot.peer.name).collect();
    assert!(names.contains(&nodes[3].name().to_string()));
}

#[test]
fn scenario_b_telemetry_updates_slot_exactly() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let coordinator = coordinator(&radio);
    let link = radio.peer(0);
    let sender = ChunkSender::new(&transport());
    let message = br#"{"name":"n1","temperature":22.5,"humidity":40.0,"tempThreshold":25.0,"heater":false}"#;

    block_on(async {
        link.connect(ADDRESS).await.unwrap();
        sender.send(&link, message).await.unwrap();
        pump(&coordinator).await;
    });

    let peer = coordinator.slots().peer(ConnectionId(1)).unwrap();
    assert_eq!(peer.name, "n1");
    assert_eq!(peer.temperature, 22.5);
    assert_eq!(peer.humidity, 40.0);
    assert_eq!(peer.temp_threshold, 25.0);
    assert!(!peer.heater);
}

#[test]
fn scenario_c_command_is_split_into_radio_sized_writes() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let peer_link = radio.peer(0);
    let payload = br#"{"tempThreshold":30.5,"heaterOverride":false}"#;
    assert_eq!(payload.len(), 45);

    let coordinator_link = radio.coordinator();
    let writes = block_on(async {
        peer_link.connect(ADDRESS).await.unwrap();
        let sink = ConnectionSink::new(&coordinator_link, ConnectionId(1));
        ChunkSender::new(&transport()).send(&sink, payload).await
    });
    assert_eq!(writes, Ok(4));

    let chunks: Vec<Vec<u8>> = std::iter::from_fn(|| peer_link.try_receive()).collect();
    let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![20, 20, 5, 1]);

    let mut reassembler = Reassembler::new(512);
    let messages: Vec<Vec<u8>> = chunks.iter().filter_map(|chunk| reassembler.push(chunk).unwrap()).collect();
    assert_eq!(messages, vec![payload.to_vec()]);
    assert_eq!(CommandUpdate::decode(&messages[0]).unwrap().temp_threshold, Some(30.5));
}

#[test]
fn scenario_c_encoded_command_round_trips_through_chunks() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let peer_link = radio.peer(0);
    let command = ControlCommand {
        temp_threshold: 30.5,
        heater_override: true,
        heater: true,
    };
    let payload = command.encode().unwrap();
    assert_eq!(payload.len(), 58);

    let coordinator_link = radio.coordinator();
    let writes = block_on(async {
        peer_link.connect(ADDRESS).await.unwrap();
        let sink = ConnectionSink::new(&coordinator_link, ConnectionId(1));
        ChunkSender::new(&transport()).send(&sink, &payload).await
    });
    assert_eq!(writes, Ok(4));

    let chunks: Vec<Vec<u8>> = std::iter::from_fn(|| peer_link.try_receive()).collect();
    let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![20, 20, 18, 1]);

    let mut reassembler = Reassembler::new(512);
    let messages: Vec<Vec<u8>> = chunks.iter().filter_map(|chunk| reassembler.push(chunk).unwrap()).collect();
    assert_eq!(messages.len(), 1);
    assert_eq!(ControlCommand::decode(&messages[0]).unwrap(), command);
}

#[test]
fn scenario_c_oversized_chunks_never_reach_the_radio() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let link = radio.peer(0);
    let sender = ChunkSender::with_limits(32, embassy_time::Duration::from_ticks(0), None);

    let result = block_on(async {
        link.connect(ADDRESS).await.unwrap();
        sender.send(&link, &[b'x'; 40]).await
    });

    assert_eq!(result, Err(TransportError::Link(LinkError::PayloadTooLarge { len: 32, max: 20 })));
}

#[test]
fn scenario_d_threshold_change_is_validated_and_broadcast() {
    let radio = SimulatedRadio::new(ADDRESS, 2, 20);
    let coordinator = coordinator(&radio);
    let mut nodes: Vec<_> = (0..2).map(|index| peer(&radio, index, 20.0)).collect();

    block_on(async {
        for node in nodes.iter_mut() {
            node.tick().await;
        }
        pump(&coordinator).await;
    });
    for node in nodes.iter_mut() {
        deliver(node);
        assert_eq!(node.policy(), ControlCommand::default());
    }

    let reply = block_on(coordinator.execute_line("SET_THRESHOLD 55"));
    assert!(reply.starts_with("error:"), "{}", reply);
    assert_eq!(coordinator.command().temp_threshold, 25.0);
    assert!(nodes.iter().all(|node| node.link().try_receive().is_none()));

    let reply = block_on(coordinator.execute_line("SET_THRESHOLD 30.5"));
    assert_eq!(reply, "threshold set to 30.5°C, sent to 2 peer(s)");
    assert_eq!(block_on(coordinator.execute_line("GET_THRESHOLD")), "threshold: 30.5°C");
    for node in nodes.iter_mut() {
        deliver(node);
        assert_eq!(node.policy().temp_threshold, 30.5);
    }
}

#[test]
fn scenario_d_override_reaches_heater() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let coordinator = coordinator(&radio);
    let mut node = peer(&radio, 0, 10.0);

    block_on(async {
        node.tick().await;
        pump(&coordinator).await;
        deliver(&mut node);
        assert!(node.sample().await.heater);

        coordinator.execute_line("HEATER_STOP").await;
        deliver(&mut node);
        assert!(!node.sample().await.heater);

        coordinator.execute_line("HEATER_AUTO").await;
        deliver(&mut node);
        assert!(node.sample().await.heater);
        pump(&coordinator).await;
    });

    let status = coordinator.status_report();
    assert!(status.contains(node.name()), "{}", status);
    assert!(status.ends_with("command: threshold 25.0°C, override off, heater off"));
}

#[test]
fn scenario_d_command_cut_off_by_congestion_does_not_corrupt_the_next() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let coordinator = coordinator(&radio);
    let mut node = peer(&radio, 0, 20.0);

    block_on(async {
        node.tick().await;
        pump(&coordinator).await;
    });
    deliver(&mut node);
    let id = radio.connection(0).unwrap();

    // Leave room for a single chunk of the next command.
    block_on(async {
        for _ in 0..DOWNLINK_QUEUE_SIZE - 1 {
            coordinator.link().send(id, b" ").await.unwrap();
        }
    });
    let reply = block_on(coordinator.execute_line("SET_THRESHOLD 30.0"));
    assert_eq!(reply, "threshold set to 30.0°C, sent to 0 peer(s)");

    let pending: Vec<Vec<u8>> = std::iter::from_fn(|| node.link().try_receive()).collect();
    assert_eq!(pending.len(), DOWNLINK_QUEUE_SIZE);
    for chunk in &pending[DOWNLINK_QUEUE_SIZE - 1..] {
        assert_eq!(node.on_bytes(chunk), Ok(None));
    }

    let reply = block_on(coordinator.execute_line("SET_THRESHOLD 40.0"));
    assert_eq!(reply, "threshold set to 40.0°C, sent to 1 peer(s)");
    deliver(&mut node);
    assert_eq!(node.policy().temp_threshold, 40.0);
    assert_eq!(node.policy(), coordinator.command());
}

#[test]
fn scenario_e_peer_reconnects_after_link_drop() {
    let radio = SimulatedRadio::new(ADDRESS, 1, 20);
    let coordinator = coordinator(&radio);
    let mut node = peer(&radio, 0, 21.0);

    block_on(async {
        node.tick().await;
        node.sample().await;
        pump(&coordinator).await;
    });
    let id = radio.connection(0).unwrap();
    assert_eq!(coordinator.slots().peer(id).unwrap().name, node.name());

    block_on(async {
        radio.drop_link(0).await;
        pump(&coordinator).await;
    });
    assert_eq!(coordinator.slots().occupied_count(), 0);

    // Telemetry while the link is down is lost; the machine notices on its next tick.
    block_on(node.sample());
    assert_eq!(node.state(), LinkState::Ready);

    block_on(async {
        node.tick().await;
        pump(&coordinator).await;
    });
    assert_eq!(node.state(), LinkState::Ready);
    assert_eq!(coordinator.slots().occupied_count(), 1);

    let report = block_on(async {
        let report = node.sample().await;
        pump(&coordinator).await;
        report
    });
    let id = radio.connection(0).unwrap();
    let slot = coordinator.slots().peer(id).unwrap();
    assert_eq!(slot.name, node.name());
    assert_eq!(slot.temperature, report.temperature);
    assert_eq!(slot.heater, report.heater);
}

#[test]
fn sample_configuration_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/network.toml");
    let config = NetworkConfig::load(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.simulation.peers.len(), 4);
    assert_eq!(config.simulation.peers[0].device_id, 0x1A2B);
}
