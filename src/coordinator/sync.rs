//! Coordinator side of the synchronization protocol.
//!
//! The coordinator owns the slot table and the active `ControlCommand`. It is driven by
//! three inputs:
//!
//! - **Link events** (`handle_event`): admission, release and telemetry reassembly.
//!   A newly admitted peer immediately receives the current command.
//! - **Operator lines** (`execute_line`): policy changes are broadcast to every
//!   occupied slot before the reply is returned.
//! - **Poll tick** (`poll`): logs a summary of the table.
//!
//! Each slot has its own `ChunkSender`, so a push to one peer never interleaves with a
//! push to the same peer; broadcasts are serialized with each other so every peer sees
//! command updates in the order the operator issued them.

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use std::cell::Cell;
use std::fmt::Write as _;

use crate::config::{CoordinatorConfig, TransportConfig};
use crate::control::{OperatorCommand, help_text, is_sentinel};
use crate::error::ProtocolError;
use crate::protocol::{ChunkSender, ConnectionId, ConnectionSink, ControlCommand, CoordinatorLink, LinkEvent, TelemetryUpdate};

use super::slots::{SlotManager, SlotSnapshot};

pub struct Coordinator<L> {
    link: L,
    slots: SlotManager,
    command: BlockingMutex<CriticalSectionRawMutex, Cell<ControlCommand>>,
    senders: Vec<ChunkSender>,
    broadcast: Mutex<CriticalSectionRawMutex, ()>,
}

impl<L: CoordinatorLink> Coordinator<L> {
    pub fn new(link: L, coordinator: &CoordinatorConfig, transport: &TransportConfig) -> Self {
        let command = ControlCommand {
            temp_threshold: coordinator.default_threshold,
            ..ControlCommand::default()
        };
        Self {
            link,
            slots: SlotManager::new(coordinator.capacity, transport.max_message_len),
            command: BlockingMutex::new(Cell::new(command)),
            senders: (0..coordinator.capacity).map(|_| ChunkSender::new(transport)).collect(),
            broadcast: Mutex::new(()),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    /// The command currently in force.
    pub fn command(&self) -> ControlCommand {
        self.command.lock(|command| command.get())
    }

    pub async fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(id) => {
                let _ = self.on_connect(id).await;
            }
            LinkEvent::Disconnected(id) => self.on_disconnect(id),
            LinkEvent::BytesReceived(id, chunk) => {
                let _ = self.on_bytes(id, &chunk);
            }
        }
    }

    /// Admit a new connection and push the current command to it.
    ///
    /// A refused connection is closed on the link.
    pub async fn on_connect(&self, id: ConnectionId) -> Result<usize, ProtocolError> {
        let index = match self.slots.on_connect(id) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Rejecting connection {}: {}", id, e);
                self.link.disconnect(id).await;
                return Err(e);
            }
        };

        log::info!("Peer connected on connection {} (slot {}, {}/{} occupied)", id, index, self.slots.occupied_count(), self.slots.capacity());
        self.send_command(index, id, self.command()).await;
        Ok(index)
    }

    pub fn on_disconnect(&self, id: ConnectionId) {
        match self.slots.on_disconnect(id) {
            Some(index) => log::info!("Peer on connection {} disconnected, slot {} free", id, index),
            None => log::debug!("Disconnect for unknown connection {}", id),
        }
    }

    /// Feed one received chunk. When it completes a message, decode it and merge it into
    /// the sender's slot.
    ///
    /// Returns the slot updated, or `None` while the message is incomplete. Errors are
    /// logged here and leave the connection open.
    pub fn on_bytes(&self, id: ConnectionId, chunk: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let result = self.slots.on_bytes(id, chunk).and_then(|message| match message {
            Some(payload) => {
                let update = TelemetryUpdate::decode(&payload)?;
                self.slots.on_telemetry(id, &update).map(Some)
            }
            None => Ok(None),
        });

        match &result {
            Ok(Some(index)) => log::trace!("Telemetry from connection {} merged into slot {}", id, index),
            Ok(None) => {}
            Err(e @ ProtocolError::UnknownConnection(_)) => log::debug!("Dropping bytes: {}", e),
            Err(e) => log::warn!("Connection {}: {}", id, e),
        }
        result
    }

    /// Push the current command to every occupied slot.
    ///
    /// Returns the number of peers the command was delivered to. A failed send is
    /// logged and does not stop the broadcast.
    pub async fn broadcast_command(&self) -> usize {
        let _guard = self.broadcast.lock().await;
        let command = self.command();

        let mut delivered = 0;
        for (index, id) in self.slots.occupied() {
            if self.send_command(index, id, command).await {
                delivered += 1;
            }
        }
        log::debug!("Command broadcast to {} peer(s): {:?}", delivered, command);
        delivered
    }

    /// Apply `change` to the active command and broadcast the result.
    pub async fn update_command(&self, change: impl FnOnce(&mut ControlCommand)) -> usize {
        self.command.lock(|command| {
            let mut updated = command.get();
            change(&mut updated);
            command.set(updated);
        });
        self.broadcast_command().await
    }

    async fn send_command(&self, index: usize, id: ConnectionId, command: ControlCommand) -> bool {
        let payload = match command.encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to encode command: {}", e);
                return false;
            }
        };

        let Some(sender) = self.senders.get(index) else {
            return false;
        };
        match sender.send(&ConnectionSink::new(&self.link, id), &payload).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to send command to connection {} (slot {}): {}", id, index, e);
                false
            }
        }
    }

    /// Parse and run one operator line, returning the reply text.
    pub async fn execute_line(&self, line: &str) -> String {
        match line.parse::<OperatorCommand>() {
            Ok(command) => self.execute(command).await,
            Err(e) => e.to_string(),
        }
    }

    pub async fn execute(&self, command: OperatorCommand) -> String {
        match command {
            OperatorCommand::SetThreshold(threshold) => {
                let delivered = self.update_command(|c| c.temp_threshold = threshold).await;
                log::info!("Threshold set to {:.1}°C", threshold);
                format!("threshold set to {:.1}°C, sent to {} peer(s)", threshold, delivered)
            }
            OperatorCommand::GetThreshold => format!("threshold: {:.1}°C", self.command().temp_threshold),
            OperatorCommand::HeaterStart => {
                let delivered = self
                    .update_command(|c| {
                        c.heater_override = true;
                        c.heater = true;
                    })
                    .await;
                log::info!("Heater override: forced on");
                format!("heaters forced on, sent to {} peer(s)", delivered)
            }
            OperatorCommand::HeaterStop => {
                let delivered = self
                    .update_command(|c| {
                        c.heater_override = true;
                        c.heater = false;
                    })
                    .await;
                log::info!("Heater override: forced off");
                format!("heaters forced off, sent to {} peer(s)", delivered)
            }
            OperatorCommand::HeaterAuto => {
                let delivered = self.update_command(|c| c.heater_override = false).await;
                log::info!("Heater override released");
                format!("heaters on threshold control, sent to {} peer(s)", delivered)
            }
            OperatorCommand::Status => self.status_report(),
            OperatorCommand::Help => help_text().to_string(),
        }
    }

    /// One line per slot followed by the active command.
    pub fn status_report(&self) -> String {
        let mut report = String::new();
        for slot in self.slots.snapshot() {
            let _ = writeln!(report, "{}", format_slot(&slot));
        }
        let command = self.command();
        let _ = write!(
            report,
            "command: threshold {:.1}°C, override {}, heater {}",
            command.temp_threshold,
            on_off(command.heater_override),
            on_off(command.heater)
        );
        report
    }

    /// Periodic tick: log a one-line summary per occupied slot.
    pub fn poll(&self) {
        for slot in self.slots.snapshot().iter().filter(|slot| slot.connection.is_some()) {
            log::debug!("{}", format_slot(slot));
        }
        if let Err(e) = self.slots.check_invariants() {
            log::error!("Slot table inconsistent: {}", e);
        }
    }
}

fn format_slot(slot: &SlotSnapshot) -> String {
    let Some(id) = slot.connection else {
        return format!("slot {}: empty", slot.index);
    };
    let peer = &slot.peer;
    let name = if peer.name.is_empty() { "<unnamed>" } else { peer.name.as_str() };
    let temperature = if is_sentinel(peer.temperature) { "n/a".to_string() } else { format!("{:.1}°C", peer.temperature) };
    format!(
        "slot {}: {} (connection {}) temperature {}, humidity {:.1}%, threshold {:.1}°C, heater {}",
        slot.index,
        name,
        id,
        temperature,
        peer.humidity,
        peer.temp_threshold,
        on_off(peer.heater)
    )
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::protocol::Reassembler;
    use embassy_futures::join::join;
    use futures::executor::block_on;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MockLink {
        writes: RefCell<Vec<(ConnectionId, Vec<u8>)>>,
        disconnected: RefCell<Vec<ConnectionId>>,
        failing: RefCell<Vec<ConnectionId>>,
    }

    impl MockLink {
        /// Commands delivered to `id`, reassembled from its writes.
        fn commands_for(&self, id: ConnectionId) -> Vec<ControlCommand> {
            let mut reassembler = Reassembler::new(512);
            self.writes
                .borrow()
                .iter()
                .filter(|(to, _)| *to == id)
                .filter_map(|(_, bytes)| reassembler.push(bytes).unwrap())
                .map(|payload| ControlCommand::decode(&payload).unwrap())
                .collect()
        }
    }

    impl CoordinatorLink for MockLink {
        async fn send(&self, id: ConnectionId, bytes: &[u8]) -> Result<(), LinkError> {
            if self.failing.borrow().contains(&id) {
                return Err(LinkError::NotConnected);
            }
            self.writes.borrow_mut().push((id, bytes.to_vec()));
            Ok(())
        }

        async fn disconnect(&self, id: ConnectionId) {
            self.disconnected.borrow_mut().push(id);
        }
    }

    fn coordinator() -> Coordinator<MockLink> {
        paced_coordinator(0)
    }

    fn paced_coordinator(pacing_ms: u64) -> Coordinator<MockLink> {
        let transport = TransportConfig {
            pacing_ms,
            ..TransportConfig::default()
        };
        Coordinator::new(MockLink::default(), &CoordinatorConfig::default(), &transport)
    }

    fn feed(coordinator: &Coordinator<MockLink>, id: ConnectionId, message: &[u8], chunk_size: usize) -> Result<Option<usize>, ProtocolError> {
        let mut last = Ok(None);
        for chunk in message.chunks(chunk_size) {
            last = coordinator.on_bytes(id, chunk);
        }
        if last.is_ok() {
            last = coordinator.on_bytes(id, b"\n");
        }
        last
    }

    #[test]
    fn new_peer_receives_current_command() {
        let coordinator = coordinator();
        block_on(coordinator.update_command(|c| c.temp_threshold = 30.0));

        assert_eq!(block_on(coordinator.on_connect(ConnectionId(1))), Ok(0));

        let commands = coordinator.link().commands_for(ConnectionId(1));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].temp_threshold, 30.0);
        assert!(!commands[0].heater_override);
    }

    #[test]
    fn connection_beyond_capacity_is_closed() {
        let coordinator = coordinator();
        for id in 1..=3 {
            block_on(coordinator.on_connect(ConnectionId(id))).unwrap();
        }

        let result = block_on(coordinator.on_connect(ConnectionId(4)));

        assert_eq!(result, Err(ProtocolError::CapacityExceeded { capacity: 3 }));
        assert_eq!(*coordinator.link().disconnected.borrow(), vec![ConnectionId(4)]);
        assert!(coordinator.link().commands_for(ConnectionId(4)).is_empty());
        assert_eq!(coordinator.slots().occupied_count(), 3);
    }

    #[test]
    fn chunked_telemetry_updates_slot() {
        let coordinator = coordinator();
        let id = ConnectionId(7);
        block_on(coordinator.on_connect(id)).unwrap();

        let message = br#"{"name":"n1","temperature":22.5,"humidity":40.0,"tempThreshold":25.0,"heater":false}"#;
        assert_eq!(feed(&coordinator, id, message, 20), Ok(Some(0)));

        let peer = coordinator.slots().peer(id).unwrap();
        assert_eq!(peer.name, "n1");
        assert_eq!(peer.temperature, 22.5);
        assert_eq!(peer.humidity, 40.0);
        assert_eq!(peer.temp_threshold, 25.0);
        assert!(!peer.heater);
    }

    #[test]
    fn malformed_message_keeps_connection() {
        let coordinator = coordinator();
        let id = ConnectionId(2);
        block_on(coordinator.on_connect(id)).unwrap();

        assert!(matches!(feed(&coordinator, id, b"not json", 20), Err(ProtocolError::MalformedMessage(_))));
        assert_eq!(feed(&coordinator, id, br#"{"temperature":18.0}"#, 20), Ok(Some(0)));

        assert_eq!(coordinator.slots().peer(id).unwrap().temperature, 18.0);
        assert!(coordinator.link().disconnected.borrow().is_empty());
    }

    #[test]
    fn bytes_from_unknown_connection_are_dropped() {
        let coordinator = coordinator();
        let result = coordinator.on_bytes(ConnectionId(9), b"{}\n");
        assert_eq!(result, Err(ProtocolError::UnknownConnection(ConnectionId(9))));
        assert!(coordinator.slots().snapshot().iter().all(|slot| slot.connection.is_none()));
    }

    #[test]
    fn threshold_change_reaches_every_peer() {
        let coordinator = coordinator();
        for id in 1..=2 {
            block_on(coordinator.on_connect(ConnectionId(id))).unwrap();
        }

        let reply = block_on(coordinator.execute_line("SET_THRESHOLD 30.5"));

        assert_eq!(reply, "threshold set to 30.5°C, sent to 2 peer(s)");
        for id in 1..=2 {
            let commands = coordinator.link().commands_for(ConnectionId(id));
            assert_eq!(commands.last().unwrap().temp_threshold, 30.5);
        }
    }

    #[test]
    fn concurrent_broadcasts_arrive_whole_and_in_order() {
        let coordinator = paced_coordinator(1);
        for id in 1..=2 {
            block_on(coordinator.on_connect(ConnectionId(id))).unwrap();
        }

        let (first, second) = block_on(join(
            coordinator.update_command(|c| c.temp_threshold = 30.0),
            coordinator.update_command(|c| c.temp_threshold = 40.0),
        ));

        assert_eq!((first, second), (2, 2));
        assert_eq!(coordinator.command().temp_threshold, 40.0);
        for id in 1..=2 {
            let thresholds: Vec<f32> = coordinator.link().commands_for(ConnectionId(id)).iter().map(|c| c.temp_threshold).collect();
            assert_eq!(thresholds, vec![25.0, 30.0, 40.0]);
        }
    }

    #[test]
    fn rejected_threshold_changes_nothing() {
        let coordinator = coordinator();
        block_on(coordinator.on_connect(ConnectionId(1))).unwrap();
        let writes_before = coordinator.link().writes.borrow().len();

        let reply = block_on(coordinator.execute_line("SET_THRESHOLD 75"));

        assert!(reply.starts_with("error:"));
        assert_eq!(coordinator.command().temp_threshold, 25.0);
        assert_eq!(coordinator.link().writes.borrow().len(), writes_before);
    }

    #[test]
    fn heater_commands_set_override() {
        let coordinator = coordinator();
        block_on(coordinator.on_connect(ConnectionId(1))).unwrap();

        block_on(coordinator.execute(OperatorCommand::HeaterStart));
        assert_eq!(
            coordinator.command(),
            ControlCommand {
                temp_threshold: 25.0,
                heater_override: true,
                heater: true
            }
        );

        block_on(coordinator.execute(OperatorCommand::HeaterStop));
        assert!(coordinator.command().heater_override);
        assert!(!coordinator.command().heater);

        block_on(coordinator.execute(OperatorCommand::HeaterAuto));
        assert!(!coordinator.command().heater_override);

        let last = *coordinator.link().commands_for(ConnectionId(1)).last().unwrap();
        assert_eq!(last, coordinator.command());
    }

    #[test]
    fn failed_send_does_not_stop_broadcast() {
        let coordinator = coordinator();
        for id in 1..=3 {
            block_on(coordinator.on_connect(ConnectionId(id))).unwrap();
        }
        coordinator.link().failing.borrow_mut().push(ConnectionId(2));

        let delivered = block_on(coordinator.update_command(|c| c.temp_threshold = 12.0));

        assert_eq!(delivered, 2);
        assert_eq!(coordinator.link().commands_for(ConnectionId(3)).last().unwrap().temp_threshold, 12.0);
    }

    #[test]
    fn status_lists_every_slot() {
        let coordinator = coordinator();
        let id = ConnectionId(4);
        block_on(coordinator.on_connect(id)).unwrap();
        feed(&coordinator, id, br#"{"name":"sensor-00aa","temperature":-1,"heater":true}"#, 20).unwrap();

        let report = block_on(coordinator.execute_line("status"));
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("slot 0: sensor-00aa (connection 4) temperature n/a"));
        assert!(lines[0].ends_with("heater on"));
        assert_eq!(lines[1], "slot 1: empty");
        assert_eq!(lines[2], "slot 2: empty");
        assert_eq!(lines[3], "command: threshold 25.0°C, override off, heater off");
    }

    #[test]
    fn disconnect_frees_slot_for_next_peer() {
        let coordinator = coordinator();
        for id in 1..=3 {
            block_on(coordinator.on_connect(ConnectionId(id))).unwrap();
        }
        block_on(coordinator.handle_event(LinkEvent::Disconnected(ConnectionId(2))));
        block_on(coordinator.handle_event(LinkEvent::Disconnected(ConnectionId(2))));
        block_on(coordinator.handle_event(LinkEvent::Connected(ConnectionId(5))));

        assert_eq!(coordinator.slots().occupied(), vec![(0, ConnectionId(1)), (1, ConnectionId(5)), (2, ConnectionId(3))]);
        coordinator.slots().check_invariants().unwrap();
    }
}
