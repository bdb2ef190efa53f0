//! Controller (component F, §4.F) — owns the proxy-link set and the valve
//! registry, and dispatches each inbound command by walking a valve's
//! configured proxy order until one `ValveSession` attempt succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use crate::proxy_link::ProxyLink;
use crate::proxy_rpc::ProxyTransport;
use crate::registry::Registry;
use crate::session::ValveSession;

/// The outcome the Bus Adapter needs to decide whether, and with what
/// payload, to publish a state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    AllProxiesFailed,
    UnknownValve,
}

pub struct Controller<T: ProxyTransport> {
    registry: Registry,
    links: HashMap<String, Arc<ProxyLink<T>>>,
}

impl<T: ProxyTransport + 'static> Controller<T> {
    pub fn new(registry: Registry, links: HashMap<String, Arc<ProxyLink<T>>>) -> Self {
        Self { registry, links }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Walks `valve_name`'s configured proxy order, skipping proxies that
    /// are not currently available, and runs a `ValveSession` attempt
    /// against the first one that accepts the connection. Stops at the
    /// first successful `RunSetState`.
    pub async fn run_command(&self, valve_name: &str, desired_on: bool) -> CommandOutcome {
        let Some(valve) = self.registry.find_valve(valve_name) else {
            log::warn!("command for unknown valve {valve_name}");
            return CommandOutcome::UnknownValve;
        };

        for proxy_hostname in &valve.proxy_order {
            let Some(link) = self.links.get(proxy_hostname) else {
                log::warn!("valve {valve_name} references unconfigured proxy {proxy_hostname}");
                continue;
            };
            if !link.available().await {
                log::debug!("skipping unavailable proxy {proxy_hostname} for valve {valve_name}");
                continue;
            }

            let transport = link.new_session_transport();
            let mut session = ValveSession::new(transport, valve.mac, valve.on_temp_c, valve.off_temp_c);
            if session.run_set_state(desired_on).await {
                log::info!("valve {valve_name} set via proxy {proxy_hostname}");
                return CommandOutcome::Succeeded;
            }
            log::warn!("valve session for {valve_name} failed via proxy {proxy_hostname}, trying next");
        }

        log::error!("all proxies failed for valve {valve_name}");
        CommandOutcome::AllProxiesFailed
    }
}
