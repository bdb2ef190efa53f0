//! CLI entrypoint: loads configuration, starts one supervised `ProxyLink`
//! per enabled proxy, and drives the Bus Adapter until a shutdown signal
//! arrives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ble_radiator_bridge::config::Config;
use ble_radiator_bridge::controller::Controller;
use ble_radiator_bridge::mqtt::MqttBus;
use ble_radiator_bridge::presence::PresenceTracker;
use ble_radiator_bridge::proxy_link::ProxyLink;
use ble_radiator_bridge::proxy_rpc::TcpJsonTransport;
use ble_radiator_bridge::bus_adapter;

#[derive(Parser)]
#[command(name = "ble-radiator-bridge", version, about = "MQTT-to-BLE bridge for radiator valve switches")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    log::info!("ble-radiator-bridge starting, config: {}", cli.config.display());

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let registry = config.to_registry();
    log::info!(
        "loaded {} valve(s), {} proxy(ies)",
        registry.valves().len(),
        registry.proxies().len()
    );

    let presence = Arc::new(PresenceTracker::new());
    let registry = Arc::new(registry);

    let client_id = format!("ble-radiator-bridge-{}", std::process::id());
    let bus = MqttBus::new(
        &client_id,
        &config.mqtt.host,
        config.mqtt.port,
        config.mqtt.username.clone(),
        config.mqtt.password.clone(),
    );
    let (bus, inbound, reconnects) = bus_adapter::connect(bus)
        .await
        .context("connecting to the mqtt broker")?;

    let mut links = HashMap::new();
    for proxy in registry.enabled_proxies() {
        let hostname = proxy.hostname.clone();
        let port = proxy.port;
        let password = proxy.password.clone();
        let link = Arc::new(ProxyLink::new(proxy.clone(), move || {
            TcpJsonTransport::new(hostname.clone(), port, password.clone())
        }));
        tokio::spawn(link.clone().run(presence.clone(), registry.clone(), bus.clone()));
        links.insert(proxy.hostname.clone(), link);
    }

    let controller = Arc::new(Controller::new((*registry).clone(), links));

    tokio::select! {
        _ = bus_adapter::run(bus, inbound, reconnects, controller, presence) => {
            log::error!("bus adapter exited unexpectedly");
        }
        _ = shutdown_signal() => {
            log::info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
