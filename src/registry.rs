//! Static registry of valves and proxies (§3 "Valve registration" / "Proxy
//! registration"). Built once from `Config` at startup and never mutated —
//! a valve's registration is immutable for the lifetime of the process.

use crate::mac::MacAddress;

/// One configured BLE proxy gateway.
#[derive(Debug, Clone)]
pub struct ProxyRegistration {
    pub hostname: String,
    pub port: u16,
    pub password: Option<String>,
    pub noise_psk: Option<String>,
    pub enabled: bool,
}

/// One configured radiator valve switch.
#[derive(Debug, Clone)]
pub struct ValveRegistration {
    pub name: String,
    pub mac: MacAddress,
    /// Proxy hostnames in the order a command walk should try them.
    pub proxy_order: Vec<String>,
    pub on_temp_c: u8,
    pub off_temp_c: u8,
}

/// The immutable set of valves and proxies this process serves.
#[derive(Debug, Clone)]
pub struct Registry {
    valves: Vec<ValveRegistration>,
    proxies: Vec<ProxyRegistration>,
}

impl Registry {
    pub fn new(valves: Vec<ValveRegistration>, proxies: Vec<ProxyRegistration>) -> Self {
        Self { valves, proxies }
    }

    pub fn valves(&self) -> &[ValveRegistration] {
        &self.valves
    }

    pub fn proxies(&self) -> &[ProxyRegistration] {
        &self.proxies
    }

    pub fn enabled_proxies(&self) -> impl Iterator<Item = &ProxyRegistration> {
        self.proxies.iter().filter(|p| p.enabled)
    }

    pub fn find_valve(&self, name: &str) -> Option<&ValveRegistration> {
        self.valves.iter().find(|v| v.name == name)
    }

    pub fn find_proxy(&self, hostname: &str) -> Option<&ProxyRegistration> {
        self.proxies.iter().find(|p| p.hostname == hostname)
    }

    pub fn find_valve_by_mac(&self, mac: MacAddress) -> Option<&ValveRegistration> {
        self.valves.iter().find(|v| v.mac == mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valve(name: &str, proxies: &[&str]) -> ValveRegistration {
        ValveRegistration {
            name: name.to_string(),
            mac: MacAddress::parse("62:00:a1:1e:c1:1f").unwrap(),
            proxy_order: proxies.iter().map(|s| s.to_string()).collect(),
            on_temp_c: 35,
            off_temp_c: 7,
        }
    }

    fn proxy(hostname: &str, enabled: bool) -> ProxyRegistration {
        ProxyRegistration {
            hostname: hostname.to_string(),
            port: 6053,
            password: None,
            noise_psk: None,
            enabled,
        }
    }

    #[test]
    fn find_valve_by_name() {
        let reg = Registry::new(vec![valve("living_room", &["hall"])], vec![proxy("hall", true)]);
        assert!(reg.find_valve("living_room").is_some());
        assert!(reg.find_valve("bedroom").is_none());
    }

    #[test]
    fn enabled_proxies_excludes_disabled() {
        let reg = Registry::new(
            vec![],
            vec![proxy("hall", true), proxy("attic", false)],
        );
        let names: Vec<_> = reg.enabled_proxies().map(|p| p.hostname.as_str()).collect();
        assert_eq!(names, vec!["hall"]);
    }

    #[test]
    fn find_valve_by_mac_matches_registered_address() {
        let reg = Registry::new(vec![valve("living_room", &["hall"])], vec![]);
        let mac = MacAddress::parse("62:00:A1:1E:C1:1F").unwrap();
        assert_eq!(reg.find_valve_by_mac(mac).map(|v| v.name.as_str()), Some("living_room"));
    }
}
