//! Configuration loading for the network.
//!
//! Every key has a default, so an empty file (or no file at all) yields the
//! reference setup: three slots, 20-byte chunks, 2 s coordinator poll.

use anyhow::Context;
use embassy_time::Duration;
use serde::Deserialize;
use std::path::Path;

use crate::control::THRESHOLD_RANGE;
use crate::protocol::DEFAULT_TEMP_THRESHOLD;
use crate::simulation::clock::SPEED_PERCENT_RANGE;

/// Largest number of simultaneous links the simulated radio can track.
pub const MAX_RADIO_LINKS: usize = 8;

/// Chunked transport parameters shared by both roles.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TransportConfig {
    /// Maximum bytes per radio write.
    pub chunk_size: usize,
    /// Gap between consecutive chunk writes (ms). Protects the receiver's buffer.
    pub pacing_ms: u64,
    /// Reassembly bound; a stream longer than this without a terminator is dropped.
    pub max_message_len: usize,
    /// Per-write timeout (ms). 0 disables it.
    pub send_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            pacing_ms: 20,
            max_message_len: 512,
            send_timeout_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_ms > 0).then(|| Duration::from_millis(self.send_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CoordinatorConfig {
    /// Radio address (advertised name) peers connect to.
    pub address: String,
    /// Number of peer slots.
    pub capacity: usize,
    pub poll_interval_ms: u64,
    /// Threshold pushed to peers until an operator changes it.
    pub default_threshold: f32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            address: "thermolink-coordinator".to_string(),
            capacity: 3,
            poll_interval_ms: 2000,
            default_threshold: DEFAULT_TEMP_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PeerConfig {
    /// Prefix of the logical peer name; the low 16 bits of the device id follow in hex.
    pub name_prefix: String,
    pub sample_period_ms: u64,
    pub liveness_interval_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "sensor-".to_string(),
            sample_period_ms: 1800,
            liveness_interval_ms: 2000,
        }
    }
}

/// One simulated peer device and its thermal environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulatedPeerConfig {
    pub device_id: u64,
    /// Temperature the room settles at with the heater off (°C).
    pub ambient: f32,
    /// Warming per sample while the heater is on (°C).
    pub heater_power: f32,
    /// Standard deviation of the reading noise (°C).
    pub noise_sigma: f32,
    /// Probability that a single sensor read returns NaN.
    pub read_failure_probability: f64,
    pub humidity: f32,
}

impl Default for SimulatedPeerConfig {
    fn default() -> Self {
        Self {
            device_id: 0xA1B2,
            ambient: 21.0,
            heater_power: 0.4,
            noise_sigma: 0.1,
            read_failure_probability: 0.02,
            humidity: 45.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulationConfig {
    /// Largest payload the simulated radio accepts in one write.
    pub max_payload: usize,
    /// Probability, per peer sample, that the simulated link drops.
    pub link_drop_probability: f64,
    /// Simulated time as a percentage of real time.
    pub speed_percent: u32,
    pub peers: Vec<SimulatedPeerConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let peer = |device_id, ambient| SimulatedPeerConfig {
            device_id,
            ambient,
            ..SimulatedPeerConfig::default()
        };
        Self {
            max_payload: 20,
            link_drop_probability: 0.01,
            speed_percent: 100,
            peers: vec![peer(0x1A2B, 19.5), peer(0x3C4D, 23.0), peer(0x5E6F, 26.5), peer(0x7A8B, 21.0)],
        }
    }
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NetworkConfig {
    pub transport: TransportConfig,
    pub coordinator: CoordinatorConfig,
    pub peer: PeerConfig,
    pub simulation: SimulationConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Reject values that would break the protocol at runtime.
    ///
    /// Checks chunk sizing against the radio payload limit, slot capacity against the
    /// radio's link table, threshold range, probabilities and peer count.
    pub fn validate(&self) -> Result<(), String> {
        let transport = &self.transport;
        if transport.chunk_size == 0 {
            return Err("chunk-size must be positive".to_string());
        }
        if transport.chunk_size > self.simulation.max_payload {
            return Err(format!(
                "chunk-size {} exceeds radio max-payload {}",
                transport.chunk_size, self.simulation.max_payload
            ));
        }
        if transport.max_message_len < transport.chunk_size {
            return Err(format!(
                "max-message-len {} must be at least chunk-size {}",
                transport.max_message_len, transport.chunk_size
            ));
        }

        let coordinator = &self.coordinator;
        if coordinator.capacity == 0 || coordinator.capacity > MAX_RADIO_LINKS {
            return Err(format!("capacity {} must be within 1-{}", coordinator.capacity, MAX_RADIO_LINKS));
        }
        if !THRESHOLD_RANGE.contains(&coordinator.default_threshold) {
            return Err(format!(
                "default-threshold {} must be within {}-{}",
                coordinator.default_threshold,
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            ));
        }
        if coordinator.poll_interval_ms == 0 || self.peer.sample_period_ms == 0 || self.peer.liveness_interval_ms == 0 {
            return Err("poll, sample and liveness intervals must be positive".to_string());
        }

        let simulation = &self.simulation;
        if simulation.peers.len() > MAX_RADIO_LINKS {
            return Err(format!("{} simulated peers exceed the radio limit of {}", simulation.peers.len(), MAX_RADIO_LINKS));
        }
        if !SPEED_PERCENT_RANGE.contains(&simulation.speed_percent) {
            return Err(format!("speed-percent {} must be within 1-1000", simulation.speed_percent));
        }
        if !(0.0..=1.0).contains(&simulation.link_drop_probability) {
            return Err("link-drop-probability must be within 0-1".to_string());
        }
        let mut device_ids = std::collections::HashSet::new();
        for peer in &simulation.peers {
            if !device_ids.insert(peer.device_id) {
                return Err(format!("Duplicate device-id found: {:#x}", peer.device_id));
            }
            if !(0.0..=1.0).contains(&peer.read_failure_probability) {
                return Err(format!("Peer {:#x} read-failure-probability must be within 0-1", peer.device_id));
            }
            if peer.noise_sigma < 0.0 {
                return Err(format!("Peer {:#x} noise-sigma must be non-negative", peer.device_id));
            }
        }

        Ok(())
    }
}
