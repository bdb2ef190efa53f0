//! Presence Tracker (component E, §4.E) — last-seen timestamps and
//! per-(valve, proxy) smoothed RSSI, behind an async-aware lock since
//! Proxy Link tasks write concurrently with the periodic publisher and
//! command walks that read availability.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::mac::MacAddress;

/// A valve's advertised name must contain this substring (case-insensitive)
/// to be considered a presence beacon at all.
pub const NAME_FILTER: &str = "vanne";

/// A valve counts as online for this long after its last matching beacon.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(60);

const RSSI_EMA_OLD_WEIGHT: f64 = 0.97;
const RSSI_EMA_NEW_WEIGHT: f64 = 0.03;

#[derive(Debug, Default)]
struct PresenceRecord {
    last_seen_at: Option<Instant>,
    rssi_by_proxy: HashMap<String, f64>,
}

/// Tracks presence for every registered valve, keyed by MAC address.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: RwLock<HashMap<MacAddress, PresenceRecord>>,
}

/// Returned by [`PresenceTracker::observe`] so the caller (the Proxy Link's
/// advertisement loop) knows whether to trigger an availability publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    StillOnline,
    BecameOnline,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the advertised name qualifies as a presence beacon
    /// at all, independent of whether its MAC is a registered valve.
    pub fn name_matches(advertised_name: &str) -> bool {
        advertised_name.to_lowercase().contains(NAME_FILTER)
    }

    /// Record an observation for `mac` seen via `proxy_hostname` at `now`
    /// with the given RSSI sample (dBm). Returns whether this observation
    /// brought the valve from offline to online.
    pub async fn observe(&self, mac: MacAddress, proxy_hostname: &str, rssi: f64, now: Instant) -> PresenceTransition {
        let mut records = self.records.write().await;
        let record = records.entry(mac).or_default();

        let was_online = record
            .last_seen_at
            .is_some_and(|seen| now.duration_since(seen) < ONLINE_WINDOW);

        record.last_seen_at = Some(now);
        let smoothed = record
            .rssi_by_proxy
            .entry(proxy_hostname.to_string())
            .or_insert(rssi);
        *smoothed = RSSI_EMA_OLD_WEIGHT * *smoothed + RSSI_EMA_NEW_WEIGHT * rssi;

        if was_online {
            PresenceTransition::StillOnline
        } else {
            PresenceTransition::BecameOnline
        }
    }

    pub async fn is_online(&self, mac: MacAddress, now: Instant) -> bool {
        let records = self.records.read().await;
        records
            .get(&mac)
            .and_then(|r| r.last_seen_at)
            .is_some_and(|seen| now.duration_since(seen) < ONLINE_WINDOW)
    }

    /// Snapshot of `"<proxy> RSSI" -> "<int> dBm"` for the attributes topic.
    pub async fn rssi_attributes(&self, mac: MacAddress) -> HashMap<String, String> {
        let records = self.records.read().await;
        match records.get(&mac) {
            Some(record) => record
                .rssi_by_proxy
                .iter()
                .map(|(hostname, rssi)| (format!("{hostname} RSSI"), format!("{} dBm", rssi.round() as i64)))
                .collect(),
            None => HashMap::new(),
        }
    }

    /// All MACs this tracker has ever recorded a beacon for.
    pub async fn known_macs(&self) -> Vec<MacAddress> {
        self.records.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress::parse("62:00:a1:1e:c1:1f").unwrap()
    }

    #[test]
    fn name_filter_is_case_insensitive_substring() {
        assert!(PresenceTracker::name_matches("La Vanne Salon"));
        assert!(PresenceTracker::name_matches("VANNE-42"));
        assert!(!PresenceTracker::name_matches("Thermostat"));
    }

    #[tokio::test]
    async fn first_beacon_is_a_transition_to_online() {
        let tracker = PresenceTracker::new();
        let t0 = Instant::now();
        let transition = tracker.observe(mac(), "hall", -60.0, t0).await;
        assert_eq!(transition, PresenceTransition::BecameOnline);
    }

    #[tokio::test]
    async fn beacon_within_window_is_not_a_transition() {
        let tracker = PresenceTracker::new();
        let t0 = Instant::now();
        tracker.observe(mac(), "hall", -60.0, t0).await;
        let t1 = t0 + Duration::from_secs(30);
        let transition = tracker.observe(mac(), "hall", -62.0, t1).await;
        assert_eq!(transition, PresenceTransition::StillOnline);
    }

    #[tokio::test]
    async fn online_window_property() {
        let tracker = PresenceTracker::new();
        let t0 = Instant::now();
        tracker.observe(mac(), "hall", -60.0, t0).await;
        assert!(tracker.is_online(mac(), t0).await);
        assert!(tracker.is_online(mac(), t0 + Duration::from_secs(59)).await);
        assert!(!tracker.is_online(mac(), t0 + Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn rssi_smoothing_stays_within_sample_bounds() {
        let tracker = PresenceTracker::new();
        let mut t = Instant::now();
        let samples = [-100.0, -20.0, 0.0, -95.0, -5.0, -50.0];
        for &sample in &samples {
            tracker.observe(mac(), "hall", sample, t).await;
            t += Duration::from_secs(1);
        }
        let attrs = tracker.rssi_attributes(mac()).await;
        let value: i64 = attrs["hall RSSI"].trim_end_matches(" dBm").parse().unwrap();
        assert!((-100..=0).contains(&value));
    }

    #[tokio::test]
    async fn unknown_mac_is_offline() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online(mac(), Instant::now()).await);
    }
}
