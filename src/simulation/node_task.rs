//! Per-peer task: liveness tick, sampling tick and downlink delivery.

use embassy_futures::select::{Either3, select3};
use embassy_time::{Duration, Ticker};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PeerConfig;
use crate::peer::PeerNode;
use crate::protocol::PeerLink;

use super::board::SimulatedBoard;
use super::radio::PeerRadio;

/// Mixed into the device id so link drops are not correlated with sensor noise.
const LINK_DROP_SEED: u64 = 0x6C69_6E6B;

/// Run one peer forever.
///
/// The node connects immediately, then follows its two tickers. After each sample the
/// radio link is dropped with `link_drop_probability` to exercise reconnection.
pub async fn peer_task(mut node: PeerNode<PeerRadio<'_>, SimulatedBoard>, config: &PeerConfig, device_id: u64, link_drop_probability: f64) {
    let mut liveness = Ticker::every(Duration::from_millis(config.liveness_interval_ms));
    let mut sampling = Ticker::every(Duration::from_millis(config.sample_period_ms));
    let mut rng = StdRng::seed_from_u64(device_id ^ LINK_DROP_SEED);

    log::info!("[{}] Peer started", node.name());
    node.tick().await;

    loop {
        let next = select3(liveness.next(), sampling.next(), node.link().receive()).await;
        match next {
            Either3::First(()) => node.tick().await,
            Either3::Second(()) => {
                node.sample().await;
                if node.link().is_connected() && rng.gen_bool(link_drop_probability) {
                    node.link().drop_link().await;
                }
            }
            Either3::Third(chunk) => {
                let _ = node.on_bytes(&chunk);
            }
        }
    }
}
