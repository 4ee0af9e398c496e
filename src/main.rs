use anyhow::Context;
use env_logger::Builder;
use futures::executor::block_on;
use log::{LevelFilter, info};
use std::io::BufRead;
use std::path::Path;
use std::thread;

use thermolink::config::NetworkConfig;
use thermolink::control::help_text;
use thermolink::simulation::{self, OperatorQueue};

fn main() -> anyhow::Result<()> {
    // Logging setup; RUST_LOG overrides the defaults
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("thermolink"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = NetworkConfig::load(Path::new(&path))?;
            info!("Loaded configuration file: {}", path);
            config
        }
        None => {
            info!("No configuration file given, using built-in defaults");
            NetworkConfig::default()
        }
    };
    config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // INTENTIONAL LEAK: the operator channel is shared between the stdin reader and the
    // network thread for the whole process lifetime.
    let operator_channel: &'static OperatorQueue = Box::leak(Box::new(OperatorQueue::new()));
    let operator_tx = operator_channel.sender();
    let operator_rx = operator_channel.receiver();

    let network_handle = thread::Builder::new()
        .name("radio-network".to_string())
        .spawn(move || simulation::run_network(&config, operator_rx))
        .context("Failed to spawn network thread")?;

    println!("{}", help_text());
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read operator input")?;
        block_on(operator_tx.send(line));
    }

    info!("Operator input closed, network keeps running");
    network_handle.join().map_err(|_| anyhow::anyhow!("Network thread panicked"))?;
    Ok(())
}
