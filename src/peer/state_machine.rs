//! Peer connection lifecycle and sampling cycle.
//!
//! ```text
//!   Disconnected --tick--> Connecting --connected--> Discovering --subscribed--> Ready
//!        ^                      |                         |                       |
//!        +------- failure ------+-------------------------+---- link lost --------+
//! ```
//!
//! The machine never terminates. Every failure lands in `Disconnected` and the next
//! liveness tick starts a fresh cycle, so a lost or refused link is retried at the tick
//! rate rather than in a tight loop.
//!
//! Sampling runs in every state: the heater is driven locally from the last received
//! policy even while the coordinator is unreachable. Telemetry is only sent when `Ready`.

use crate::config::{PeerConfig, TransportConfig};
use crate::control::{decide, is_sentinel, sanitize_reading};
use crate::error::{LinkError, ProtocolError};
use crate::protocol::{ChunkSender, CommandUpdate, ControlCommand, PeerLink, Reassembler, TelemetryReport, TelemetryUpdate};

use super::hardware::{Actuator, Sensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
}

/// Logical peer name: `prefix` followed by the low 16 bits of the device id in hex.
pub fn derive_peer_name(prefix: &str, device_id: u64) -> String {
    format!("{}{:04x}", prefix, device_id & 0xFFFF)
}

pub struct PeerNode<L, H> {
    link: L,
    board: H,
    name: String,
    coordinator_address: String,
    state: LinkState,
    policy: ControlCommand,
    heater: bool,
    sender: ChunkSender,
    reassembler: Reassembler,
}

impl<L: PeerLink, H: Sensor + Actuator> PeerNode<L, H> {
    pub fn new(link: L, board: H, device_id: u64, coordinator_address: &str, peer: &PeerConfig, transport: &TransportConfig) -> Self {
        Self {
            link,
            board,
            name: derive_peer_name(&peer.name_prefix, device_id),
            coordinator_address: coordinator_address.to_string(),
            state: LinkState::Disconnected,
            policy: ControlCommand::default(),
            heater: false,
            sender: ChunkSender::new(transport),
            reassembler: Reassembler::new(transport.max_message_len),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Last command received from the coordinator.
    pub fn policy(&self) -> ControlCommand {
        self.policy
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn board(&self) -> &H {
        &self.board
    }

    /// Periodic liveness check. Starts a connect cycle unless the link is `Ready` and live.
    pub async fn tick(&mut self) {
        if self.state == LinkState::Ready {
            if self.link.is_connected() {
                return;
            }
            log::info!("[{}] Link to coordinator lost", self.name);
            self.state = LinkState::Disconnected;
        }
        self.connect().await;
    }

    async fn connect(&mut self) {
        match self.try_connect().await {
            Ok(()) => {
                log::info!("[{}] Ready", self.name);
                self.announce().await;
            }
            Err(e) => {
                log::warn!("[{}] Connect cycle failed in {:?}: {}", self.name, self.state, e);
                self.link.disconnect().await;
                self.state = LinkState::Disconnected;
            }
        }
    }

    async fn try_connect(&mut self) -> Result<(), LinkError> {
        self.state = LinkState::Connecting;
        log::debug!("[{}] Connecting to {}", self.name, self.coordinator_address);
        self.link.connect(&self.coordinator_address).await?;

        self.state = LinkState::Discovering;
        self.link.discover().await?;
        self.link.subscribe().await?;

        self.reassembler.reset();
        self.state = LinkState::Ready;
        Ok(())
    }

    /// Send the name-only identity object.
    async fn announce(&mut self) {
        match TelemetryUpdate::announcement(&self.name).encode() {
            Ok(payload) => {
                if let Err(e) = self.sender.send(&self.link, &payload).await {
                    log::warn!("[{}] Identity announcement failed: {}", self.name, e);
                }
            }
            Err(e) => log::error!("[{}] Failed to encode announcement: {}", self.name, e),
        }
    }

    /// One sampling cycle: read sensors, drive the heater, report when `Ready`.
    pub async fn sample(&mut self) -> TelemetryReport {
        let temperature = self.board.read_temperature();
        let humidity = self.board.read_humidity();
        if temperature.is_nan() || humidity.is_nan() {
            log::warn!("[{}] {}", self.name, ProtocolError::SensorReadInvalid);
        }
        let temperature = sanitize_reading(temperature);
        let humidity = sanitize_reading(humidity);

        let policy = self.policy;
        let heater = decide(policy.heater_override, policy.heater, temperature, policy.temp_threshold, self.heater);
        if heater != self.heater {
            log::info!("[{}] Heater {}", self.name, if heater { "on" } else { "off" });
        }
        self.heater = heater;
        self.board.set_heater(heater);

        if is_sentinel(temperature) {
            log::debug!("[{}] humidity {:.1}% temperature n/a threshold {:.1}°C heater {} override {}", self.name, humidity, policy.temp_threshold, heater, policy.heater_override);
        } else {
            log::debug!("[{}] humidity {:.1}% temperature {:.1}°C threshold {:.1}°C heater {} override {}", self.name, humidity, temperature, policy.temp_threshold, heater, policy.heater_override);
        }

        let report = TelemetryReport {
            name: self.name.clone(),
            temperature,
            humidity,
            temp_threshold: policy.temp_threshold,
            heater,
        };

        if self.state == LinkState::Ready {
            match report.encode() {
                Ok(payload) => {
                    if let Err(e) = self.sender.send(&self.link, &payload).await {
                        log::warn!("[{}] Telemetry send failed: {}", self.name, e);
                    }
                }
                Err(e) => log::error!("[{}] Failed to encode telemetry: {}", self.name, e),
            }
        }
        report
    }

    /// Feed a received command chunk. Returns the new policy once a command completes.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> Result<Option<ControlCommand>, ProtocolError> {
        let result = self.reassembler.push(chunk).and_then(|message| match message {
            Some(payload) => {
                CommandUpdate::decode(&payload)?.apply_to(&mut self.policy);
                Ok(Some(self.policy))
            }
            None => Ok(None),
        });

        match &result {
            Ok(Some(policy)) => log::info!(
                "[{}] Command received: threshold {:.1}°C, override {}, heater {}",
                self.name,
                policy.temp_threshold,
                policy.heater_override,
                policy.heater
            ),
            Ok(None) => {}
            Err(e) => log::warn!("[{}] {}", self.name, e),
        }
        result
    }
}
