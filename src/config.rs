//! Typed configuration document (§3 "Configuration document", §6, §9 "Dict-
//! shaped config"). Loaded from YAML with `serde_yaml`, mirroring the
//! original implementation's `yaml.safe_load`, then validated in a separate
//! step so validation errors can name the offending valve by field.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mac::MacAddress;
use crate::registry::{ProxyRegistration, Registry, ValveRegistration};

fn default_mqtt_port() -> u16 {
    1883
}

fn default_proxy_port() -> u16 {
    6053
}

fn default_enabled() -> bool {
    true
}

fn default_on_temperature() -> u8 {
    35
}

fn default_off_temperature() -> u8 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub hostname: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub noise_psk: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValveConfig {
    pub name: String,
    pub mac_address: String,
    pub bluetooth_proxies: Vec<String>,
    #[serde(default = "default_on_temperature")]
    pub on_temperature: u8,
    #[serde(default = "default_off_temperature")]
    pub off_temperature: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bluetooth_proxies: Vec<ProxyConfig>,
    pub radiator_valve_switches: Vec<ValveConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field invariants serde can't express on its own:
    /// unique valve names, parseable MAC addresses, and proxy references
    /// that actually resolve to a configured proxy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = std::collections::HashSet::new();
        for valve in &self.radiator_valve_switches {
            if !seen_names.insert(valve.name.as_str()) {
                return Err(ConfigError::DuplicateValveName(valve.name.clone()));
            }
            MacAddress::parse(&valve.mac_address).map_err(|reason| ConfigError::InvalidMac {
                valve: valve.name.clone(),
                mac: valve.mac_address.clone(),
                reason,
            })?;
            for hostname in &valve.bluetooth_proxies {
                if !self.bluetooth_proxies.iter().any(|p| &p.hostname == hostname) {
                    return Err(ConfigError::UnknownProxy {
                        valve: valve.name.clone(),
                        hostname: hostname.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Builds the immutable runtime [`Registry`] from this document. Only
    /// valid to call after [`Config::validate`] has succeeded (`load` always
    /// validates; callers constructing a `Config` by hand must validate too).
    pub fn to_registry(&self) -> Registry {
        let proxies = self
            .bluetooth_proxies
            .iter()
            .map(|p| ProxyRegistration {
                hostname: p.hostname.clone(),
                port: p.port,
                password: p.password.clone(),
                noise_psk: p.noise_psk.clone(),
                enabled: p.enabled,
            })
            .collect();

        let valves = self
            .radiator_valve_switches
            .iter()
            .map(|v| ValveRegistration {
                name: v.name.clone(),
                mac: MacAddress::parse(&v.mac_address).expect("validated by Config::validate"),
                proxy_order: v.bluetooth_proxies.clone(),
                on_temp_c: v.on_temperature,
                off_temp_c: v.off_temperature,
            })
            .collect();

        Registry::new(valves, proxies)
    }
}
