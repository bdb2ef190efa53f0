//! Fakes shared across unit tests for the Controller, Bus Adapter, and
//! Valve Session — in-memory stand-ins for `MessageBus` and `ProxyTransport`
//! so those components are testable without a real broker or BLE proxy.

#![cfg(test)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::error::{BusError, ProxyRpcError};
use crate::mac::MacAddress;
use crate::mqtt::{InboundMessage, MessageBus};
use crate::proxy_rpc::{Advertisement, ProxyTransport};

pub struct FakeBus {
    pub published: Arc<Mutex<Vec<(String, Vec<u8>, bool)>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    reconnect_rx: Option<mpsc::Receiver<()>>,
    /// Tests can send on this directly to simulate a broker reconnection;
    /// `connect()` already sends the initial signal, matching a real
    /// broker's first `CONNACK`.
    pub reconnect_tx: mpsc::Sender<()>,
}

impl FakeBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(16);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(4);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            inbound_rx: Some(rx),
            inbound_tx: tx,
            reconnect_rx: Some(reconnect_rx),
            reconnect_tx,
        }
    }
}

#[async_trait::async_trait]
impl MessageBus for FakeBus {
    async fn connect(&mut self) -> Result<(), BusError> {
        let _ = self.reconnect_tx.send(()).await;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BusError> {
        self.published.lock().await.push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<(), BusError> {
        self.subscriptions.lock().await.push(topic_filter.to_string());
        Ok(())
    }

    fn inbound(&mut self) -> mpsc::Receiver<InboundMessage> {
        self.inbound_rx.take().expect("inbound() called more than once")
    }

    fn reconnects(&mut self) -> mpsc::Receiver<()> {
        self.reconnect_rx.take().expect("reconnects() called more than once")
    }
}

/// A transport that plays back a fixed script of notification frames, one
/// per `gatt_write`, and can be told to fail connect/write outright.
pub struct FakeProxyTransport {
    pub connect_should_fail: bool,
    notify_tx: Option<mpsc::Sender<Vec<u8>>>,
    adv_tx: Option<mpsc::Sender<Advertisement>>,
    script: Arc<Mutex<VecDeque<Vec<u8>>>>,
    pub writes: Arc<Mutex<Vec<(u16, Vec<u8>)>>>,
    advertisements: Vec<Advertisement>,
}

impl FakeProxyTransport {
    pub fn new(responses: Vec<Vec<u8>>) -> Self {
        Self {
            connect_should_fail: false,
            notify_tx: None,
            adv_tx: None,
            script: Arc::new(Mutex::new(responses.into())),
            writes: Arc::new(Mutex::new(Vec::new())),
            advertisements: Vec::new(),
        }
    }

    /// Scripts a fixed batch of advertisements delivered the moment
    /// `subscribe_advertisements` is called.
    pub fn with_advertisements(mut self, advertisements: Vec<Advertisement>) -> Self {
        self.advertisements = advertisements;
        self
    }
}

#[async_trait::async_trait]
impl ProxyTransport for FakeProxyTransport {
    async fn connect(&mut self, _keepalive: Duration) -> Result<(), ProxyRpcError> {
        if self.connect_should_fail {
            return Err(ProxyRpcError::Disconnected);
        }
        Ok(())
    }

    async fn subscribe_advertisements(&mut self) -> Result<mpsc::Receiver<Advertisement>, ProxyRpcError> {
        let (tx, rx) = mpsc::channel(self.advertisements.len().max(1));
        for adv in self.advertisements.drain(..) {
            let _ = tx.send(adv).await;
        }
        // Kept alive in `self` rather than dropped here: a real subscription
        // stream stays open for the life of the connection, not just until
        // the scripted batch drains.
        self.adv_tx = Some(tx);
        Ok(rx)
    }

    async fn gatt_connect(&mut self, _mac: MacAddress, _connect_timeout: Duration) -> Result<(), ProxyRpcError> {
        if self.connect_should_fail {
            return Err(ProxyRpcError::Disconnected);
        }
        Ok(())
    }

    async fn gatt_start_notify(&mut self, _handle: u16) -> Result<mpsc::Receiver<Vec<u8>>, ProxyRpcError> {
        let (tx, rx) = mpsc::channel(16);
        self.notify_tx = Some(tx);
        Ok(rx)
    }

    async fn gatt_write(&mut self, handle: u16, data: &[u8], _timeout: Duration) -> Result<(), ProxyRpcError> {
        self.writes.lock().await.push((handle, data.to_vec()));
        if let Some(response) = self.script.lock().await.pop_front() {
            if let Some(tx) = &self.notify_tx {
                let _ = tx.send(response).await;
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self, _disconnect_timeout: Duration) -> Result<(), ProxyRpcError> {
        Ok(())
    }
}
