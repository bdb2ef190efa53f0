//! MQTT topic strings and Home Assistant discovery payloads (§6).

use serde::Serialize;

use crate::mac::MacAddress;

pub const PREFIX: &str = "ble_radiator_valve";
pub const DISCOVERY_PREFIX: &str = "homeassistant";

pub fn command_topic(valve_name: &str) -> String {
    format!("{PREFIX}/{valve_name}/set")
}

pub fn state_topic(valve_name: &str) -> String {
    format!("{PREFIX}/{valve_name}/state")
}

pub fn availability_topic(valve_name: &str) -> String {
    format!("{PREFIX}/{valve_name}/online")
}

pub fn attributes_topic(valve_name: &str) -> String {
    format!("{PREFIX}/{valve_name}/attributes")
}

pub fn discovery_topic(valve_name: &str) -> String {
    format!("{DISCOVERY_PREFIX}/valve/radiator_valve_{valve_name}/config")
}

pub fn discovery_status_topic() -> String {
    format!("{DISCOVERY_PREFIX}/status")
}

/// `true`/`1`/`on`/`open` (case-insensitive) map to an "on" command; anything
/// else is treated as "off". The Bus Adapter only calls this after matching
/// the topic against a registered valve name.
pub fn parse_command_payload(payload: &str) -> bool {
    matches!(payload.trim().to_lowercase().as_str(), "true" | "1" | "on" | "open")
}

pub fn state_payload(is_open: bool) -> &'static str {
    if is_open {
        "open"
    } else {
        "closed"
    }
}

pub fn availability_payload(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}

#[derive(Debug, Serialize)]
struct DiscoveryAvailability {
    topic: String,
}

#[derive(Debug, Serialize)]
struct DiscoveryDevice {
    identifiers: [String; 1],
    name: String,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryPayload {
    unique_id: String,
    object_id: String,
    name: String,
    state_topic: String,
    command_topic: String,
    json_attributes_topic: String,
    availability: [DiscoveryAvailability; 1],
    device: DiscoveryDevice,
}

pub fn discovery_payload(valve_name: &str, mac: MacAddress) -> DiscoveryPayload {
    let object_id = format!("radiator_valve_{valve_name}");
    DiscoveryPayload {
        unique_id: object_id.clone(),
        object_id,
        name: format!("Radiator Valve {valve_name}"),
        state_topic: state_topic(valve_name),
        command_topic: command_topic(valve_name),
        json_attributes_topic: attributes_topic(valve_name),
        availability: [DiscoveryAvailability {
            topic: availability_topic(valve_name),
        }],
        device: DiscoveryDevice {
            identifiers: [mac.to_string()],
            name: format!("Radiator Valve {valve_name}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_built_from_the_valve_name() {
        assert_eq!(command_topic("living_room"), "ble_radiator_valve/living_room/set");
        assert_eq!(state_topic("living_room"), "ble_radiator_valve/living_room/state");
        assert_eq!(availability_topic("living_room"), "ble_radiator_valve/living_room/online");
        assert_eq!(
            discovery_topic("living_room"),
            "homeassistant/valve/radiator_valve_living_room/config"
        );
    }

    #[test]
    fn command_payload_parsing_matches_truthy_variants() {
        for on in ["true", "1", "on", "open", "ON", " True "] {
            assert!(parse_command_payload(on), "{on:?} should parse as on");
        }
        for off in ["false", "0", "off", "closed", "garbage"] {
            assert!(!parse_command_payload(off), "{off:?} should parse as off");
        }
    }

    #[test]
    fn discovery_payload_serializes_expected_fields() {
        let mac = MacAddress::parse("62:00:a1:1e:c1:1f").unwrap();
        let payload = discovery_payload("living_room", mac);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["object_id"], "radiator_valve_living_room");
        assert_eq!(json["device"]["identifiers"][0], "62:00:a1:1e:c1:1f");
        assert_eq!(json["availability"][0]["topic"], "ble_radiator_valve/living_room/online");
    }
}
