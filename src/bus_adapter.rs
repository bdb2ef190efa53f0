//! Bus Adapter (component G, §4.G) — subscribes to command topics and
//! publishes state, availability, attributes, and Home Assistant discovery
//! payloads. Generic over `MessageBus` so routing is testable against
//! `crate::test_support::FakeBus` without a broker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::controller::{CommandOutcome, Controller};
use crate::mqtt::{InboundMessage, MessageBus};
use crate::presence::PresenceTracker;
use crate::proxy_rpc::ProxyTransport;
use crate::registry::Registry;
use crate::topics;

const AVAILABILITY_TICK: Duration = Duration::from_secs(30);

/// Connects `bus` and hands back the already-`Arc`-wrapped handle along with
/// its inbound-message and reconnect-signal streams, so the caller can share
/// the same bus with other components (e.g. the Proxy Links publishing
/// availability) before handing it to [`run`].
pub async fn connect<B: MessageBus + 'static>(
    mut bus: B,
) -> Result<(Arc<B>, mpsc::Receiver<InboundMessage>, mpsc::Receiver<()>), crate::error::BusError> {
    bus.connect().await?;
    let inbound = bus.inbound();
    let reconnects = bus.reconnects();
    Ok((Arc::new(bus), inbound, reconnects))
}

/// Services inbound messages until the bus's stream ends (normally only on
/// shutdown). Discovery publish and topic subscription are driven by the
/// bus's reconnect signal rather than run once up front, so both happen
/// again after a broker restart (§4.G, §7). `bus` must already be connected
/// (see [`connect`]).
pub async fn run<B, T>(
    bus: Arc<B>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut reconnects: mpsc::Receiver<()>,
    controller: Arc<Controller<T>>,
    presence: Arc<PresenceTracker>,
) where
    B: MessageBus + 'static,
    T: ProxyTransport + 'static,
{
    {
        let bus = bus.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            while reconnects.recv().await.is_some() {
                log::info!("(re)connected to message bus, re-publishing discovery and subscriptions");
                publish_all_discovery(&bus, controller.registry()).await;
                let _ = bus.subscribe(&format!("{}/+/set", topics::PREFIX)).await;
                let _ = bus.subscribe(&topics::discovery_status_topic()).await;
            }
        });
    }

    {
        let bus = bus.clone();
        let controller = controller.clone();
        let presence = presence.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(AVAILABILITY_TICK).await;
                publish_presence_snapshot(&bus, controller.registry(), &presence).await;
            }
        });
    }

    while let Some(msg) = inbound.recv().await {
        let topic = msg.topic.clone();
        if topic == topics::discovery_status_topic() {
            publish_all_discovery(&bus, controller.registry()).await;
            continue;
        }

        let Some(valve_name) = parse_set_topic(&topic) else {
            log::debug!("ignoring message on unrecognized topic {topic}");
            continue;
        };
        if controller.registry().find_valve(valve_name).is_none() {
            log::warn!("command for unknown valve {valve_name}");
            continue;
        }
        let Ok(payload) = std::str::from_utf8(&msg.payload) else {
            log::warn!("non-utf8 command payload on {topic}");
            continue;
        };
        let desired_on = topics::parse_command_payload(payload);

        let bus = bus.clone();
        let controller = controller.clone();
        let valve_name = valve_name.to_string();
        tokio::spawn(async move {
            match controller.run_command(&valve_name, desired_on).await {
                CommandOutcome::Succeeded => {
                    let payload = topics::state_payload(desired_on);
                    if let Err(e) = bus.publish(&topics::state_topic(&valve_name), payload.as_bytes(), true).await {
                        log::warn!("failed to publish state for {valve_name}: {e}");
                    }
                }
                CommandOutcome::AllProxiesFailed => {
                    log::error!("no proxy could complete the command for {valve_name}");
                }
                CommandOutcome::UnknownValve => {}
            }
        });
    }
}

/// Extracts `<name>` from a topic of the form `PREFIX/<name>/set`.
fn parse_set_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix(topics::PREFIX)?.strip_prefix('/')?;
    rest.strip_suffix("/set")
}

async fn publish_all_discovery<B: MessageBus>(bus: &B, registry: &Registry) {
    for valve in registry.valves() {
        let payload = topics::discovery_payload(&valve.name, valve.mac);
        match serde_json::to_vec(&payload) {
            Ok(json) => {
                if let Err(e) = bus.publish(&topics::discovery_topic(&valve.name), &json, true).await {
                    log::warn!("failed to publish discovery for {}: {e}", valve.name);
                }
            }
            Err(e) => log::error!("failed to serialize discovery payload for {}: {e}", valve.name),
        }
    }
}

async fn publish_presence_snapshot<B: MessageBus>(bus: &B, registry: &Registry, presence: &PresenceTracker) {
    let now = Instant::now();
    for valve in registry.valves() {
        let online = presence.is_online(valve.mac, now).await;
        let _ = bus
            .publish(&topics::availability_topic(&valve.name), topics::availability_payload(online).as_bytes(), true)
            .await;

        let attrs = presence.rssi_attributes(valve.mac).await;
        if let Ok(json) = serde_json::to_vec(&attrs) {
            let _ = bus.publish(&topics::attributes_topic(&valve.name), &json, false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::mac::MacAddress;
    use crate::proxy_link::ProxyLink;
    use crate::registry::{ProxyRegistration, ValveRegistration};
    use crate::test_support::{FakeBus, FakeProxyTransport};
    use std::collections::HashMap;

    fn registry() -> Registry {
        Registry::new(
            vec![ValveRegistration {
                name: "living_room".into(),
                mac: MacAddress::parse("62:00:a1:1e:c1:1f").unwrap(),
                proxy_order: vec!["hall".into()],
                on_temp_c: 35,
                off_temp_c: 7,
            }],
            vec![ProxyRegistration {
                hostname: "hall".into(),
                port: 6053,
                password: None,
                noise_psk: None,
                enabled: true,
            }],
        )
    }

    #[tokio::test]
    async fn discovery_is_published_for_every_registered_valve_on_connect() {
        let bus = FakeBus::new();
        let published = bus.published.clone();
        let controller: Arc<Controller<FakeProxyTransport>> = Arc::new(Controller::new(registry(), HashMap::new()));
        let presence = Arc::new(PresenceTracker::new());

        let (bus, inbound, reconnects) = connect(bus).await.unwrap();
        let adapter = tokio::spawn(run(bus, inbound, reconnects, controller, presence));
        tokio::time::sleep(Duration::from_millis(20)).await;
        adapter.abort();

        let msgs = published.lock().await;
        assert!(msgs.iter().any(|(topic, _, _)| topic == "homeassistant/valve/radiator_valve_living_room/config"));
    }

    #[tokio::test]
    async fn successful_command_publishes_state() {
        let bus = FakeBus::new();
        let published = bus.published.clone();
        let inbound_tx = bus.inbound_tx.clone();

        let link = Arc::new(ProxyLink::new(
            ProxyRegistration {
                hostname: "hall".into(),
                port: 6053,
                password: None,
                noise_psk: None,
                enabled: true,
            },
            || {
                FakeProxyTransport::new(vec![
                    encode(0x01, 1, &[0x00]),
                    encode(0x0C, 2, &[0x46, 0x00]),
                    encode(0x01, 3, &[]),
                    encode(0x0C, 4, &[]),
                    encode(0x0C, 5, &[0x5E, 0x01]),
                ])
            },
        ));
        let presence_for_link = Arc::new(PresenceTracker::new());
        let link_bus = Arc::new(FakeBus::new());
        let link_runner = tokio::spawn(link.clone().run(presence_for_link, Arc::new(registry()), link_bus));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut links = HashMap::new();
        links.insert("hall".to_string(), link);
        let controller = Arc::new(Controller::new(registry(), links));
        let presence = Arc::new(PresenceTracker::new());

        let (bus, inbound, reconnects) = connect(bus).await.unwrap();
        let adapter = tokio::spawn(run(bus, inbound, reconnects, controller, presence));
        tokio::time::sleep(Duration::from_millis(20)).await;

        inbound_tx
            .send(crate::mqtt::InboundMessage {
                topic: "ble_radiator_valve/living_room/set".into(),
                payload: b"on".to_vec(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let msgs = published.lock().await;
        assert!(msgs
            .iter()
            .any(|(topic, payload, _)| topic == "ble_radiator_valve/living_room/state" && payload == b"open"));

        adapter.abort();
        link_runner.abort();
    }

    #[test]
    fn set_topic_parsing_extracts_the_valve_name() {
        assert_eq!(parse_set_topic("ble_radiator_valve/living_room/set"), Some("living_room"));
        assert_eq!(parse_set_topic("homeassistant/status"), None);
    }
}
