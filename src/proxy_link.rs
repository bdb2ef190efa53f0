//! Proxy Link (component D, §4.D) — a supervised, long-lived connection to
//! one BLE proxy: reconnect-with-backoff, advertisement streaming into the
//! Presence Tracker, and an availability flag the Controller reads before
//! routing a command through this proxy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::ExponentialBuilder;
use tokio::sync::RwLock;

use crate::mqtt::MessageBus;
use crate::presence::{PresenceTracker, PresenceTransition};
use crate::proxy_rpc::ProxyTransport;
use crate::registry::{ProxyRegistration, Registry};
use crate::topics;

const KEEPALIVE: Duration = Duration::from_secs(30);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn backoff_schedule() -> impl Iterator<Item = Duration> {
    ExponentialBuilder::default()
        .with_min_delay(MIN_BACKOFF)
        .with_max_delay(MAX_BACKOFF)
        .without_max_times()
        .build()
}

/// One proxy's supervised connection, generic over the transport so the
/// reconnect loop and advertisement routing are testable against
/// [`crate::test_support::FakeProxyTransport`].
pub struct ProxyLink<T: ProxyTransport> {
    registration: ProxyRegistration,
    available: Arc<RwLock<bool>>,
    make_transport: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: ProxyTransport + 'static> ProxyLink<T> {
    pub fn new(registration: ProxyRegistration, make_transport: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            registration,
            available: Arc::new(RwLock::new(false)),
            make_transport: Box::new(make_transport),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.registration.hostname
    }

    pub async fn available(&self) -> bool {
        *self.available.read().await
    }

    /// A fresh transport instance for a `ValveSession` attempt. Separate
    /// from the control-plane transport this link keeps open for
    /// advertisement streaming, since a session owns its own BLE connection.
    pub fn new_session_transport(&self) -> T {
        (self.make_transport)()
    }

    /// Runs the reconnect-with-backoff supervisor loop until the task is
    /// cancelled. Intended to be spawned as its own task at startup.
    ///
    /// `registry` resolves an advertised MAC to a valve name and `bus`
    /// publishes that valve's availability topic the moment a beacon brings
    /// it from offline to online (§4.E).
    pub async fn run<B: MessageBus + 'static>(self: Arc<Self>, presence: Arc<PresenceTracker>, registry: Arc<Registry>, bus: Arc<B>) {
        let mut backoff = backoff_schedule();

        loop {
            let mut transport = self.new_session_transport();
            match transport.connect(KEEPALIVE).await {
                Ok(()) => {
                    log::info!("connected to proxy {}", self.registration.hostname);
                    *self.available.write().await = true;
                    backoff = backoff_schedule();

                    self.stream_advertisements(&mut transport, &presence, &registry, bus.as_ref()).await;

                    *self.available.write().await = false;
                    log::warn!("disconnected from proxy {}", self.registration.hostname);
                }
                Err(e) => {
                    log::warn!("failed to connect to proxy {}: {e}", self.registration.hostname);
                }
            }

            let delay = backoff.next().unwrap_or(MAX_BACKOFF);
            tokio::time::sleep(delay).await;
        }
    }

    async fn stream_advertisements<B: MessageBus>(
        &self,
        transport: &mut T,
        presence: &PresenceTracker,
        registry: &Registry,
        bus: &B,
    ) {
        let mut advertisements = match transport.subscribe_advertisements().await {
            Ok(rx) => rx,
            Err(e) => {
                log::warn!("advertisement subscription failed on {}: {e}", self.registration.hostname);
                return;
            }
        };

        while let Some(adv) = advertisements.recv().await {
            if !PresenceTracker::name_matches(&adv.name) {
                continue;
            }
            let transition = presence
                .observe(adv.mac, &self.registration.hostname, adv.rssi as f64, Instant::now())
                .await;

            if transition == PresenceTransition::BecameOnline {
                let Some(valve) = registry.find_valve_by_mac(adv.mac) else {
                    continue;
                };
                if let Err(e) = bus
                    .publish(&topics::availability_topic(&valve.name), topics::availability_payload(true).as_bytes(), true)
                    .await
                {
                    log::warn!("failed to publish availability for {}: {e}", valve.name);
                }
            }
        }
    }
}
