//! Valve Session (component C, §4.C) — the connect → sync → read →
//! set-mode → set-temperature → verify → disconnect choreography for one
//! attempt against one valve via one proxy.
//!
//! Generic over [`ProxyTransport`] so the step choreography is unit-testable
//! against [`crate::test_support::FakeProxyTransport`], independent of real
//! sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::codec::{self, DecodedFrame};
use crate::error::SessionError;
use crate::mac::MacAddress;
use crate::proxy_rpc::{ProxyTransport, NOTIFY_HANDLE, WRITE_HANDLE};
use crate::reassembly::Reassembler;

const FUNC_SYNC_OR_MODE: u8 = 0x01;
const FUNC_TEMP: u8 = 0x0C;

const MAX_TRIES: u32 = 5;
const SYNC_SUB_TRIES: u32 = 10;
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(500);
const STEP_PAUSE: Duration = Duration::from_millis(100);
const ATTEMPT_RETRY_SLEEP: Duration = Duration::from_secs(6);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct PendingState {
    expected_pkt: u8,
    response: Option<DecodedFrame>,
    mismatched_pkt: Option<u8>,
}

/// Drives one `RunSetState` call against one valve. A fresh `ValveSession`
/// is created per command attempt and discarded afterwards.
pub struct ValveSession<T: ProxyTransport> {
    transport: T,
    mac: MacAddress,
    on_temp_c: u8,
    off_temp_c: u8,
    next_pkt: u8,
    max_tries: u32,
    response_timeout: Duration,
    pending: Option<Arc<Mutex<PendingState>>>,
    notify: Option<Arc<Notify>>,
    reader_task: Option<JoinHandle<()>>,
}

impl<T: ProxyTransport + 'static> ValveSession<T> {
    pub fn new(transport: T, mac: MacAddress, on_temp_c: u8, off_temp_c: u8) -> Self {
        Self {
            transport,
            mac,
            on_temp_c,
            off_temp_c,
            next_pkt: 0,
            max_tries: MAX_TRIES,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            pending: None,
            notify: None,
            reader_task: None,
        }
    }

    #[cfg(test)]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Drives `desiredOn` to completion, retrying up to `max_tries` full
    /// attempts. Returns `true` iff some attempt reached the final verified
    /// write; `false` once the attempt budget is exhausted.
    pub async fn run_set_state(&mut self, desired_on: bool) -> bool {
        for attempt in 1..=self.max_tries {
            match self.run_attempt(desired_on).await {
                Ok(()) => return true,
                Err(e) => {
                    log::warn!(
                        "valve session attempt {attempt}/{} failed: {e}",
                        self.max_tries
                    );
                    self.teardown_attempt().await;
                    if attempt < self.max_tries {
                        tokio::time::sleep(ATTEMPT_RETRY_SLEEP).await;
                    }
                }
            }
        }
        false
    }

    async fn run_attempt(&mut self, desired_on: bool) -> Result<(), SessionError> {
        self.transport.gatt_connect(self.mac, CONNECT_TIMEOUT).await?;
        let notify_rx = self.transport.gatt_start_notify(NOTIFY_HANDLE).await?;

        let pending = Arc::new(Mutex::new(PendingState::default()));
        let notify = Arc::new(Notify::new());
        self.pending = Some(pending.clone());
        self.notify = Some(notify.clone());
        self.reader_task = Some(spawn_reader(notify_rx, pending, notify));

        let read_mode = self.sync_packet_number().await?;
        tokio::time::sleep(STEP_PAUSE).await;

        let before = self.read_current_temp().await?;
        let _ = before;
        tokio::time::sleep(STEP_PAUSE).await;

        self.write_comfort_mode(read_mode).await?;
        tokio::time::sleep(STEP_PAUSE).await;

        let written_deci = self.write_set_point(desired_on).await?;
        tokio::time::sleep(STEP_PAUSE).await;

        let read_back = self.read_current_temp().await?;
        if read_back != written_deci {
            return Err(SessionError::VerifyMismatch {
                wrote: written_deci,
                read_back,
            });
        }

        self.transport.disconnect(DISCONNECT_TIMEOUT).await?;
        self.teardown_attempt().await;
        Ok(())
    }

    async fn teardown_attempt(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.pending = None;
        self.notify = None;
    }

    /// Up to [`SYNC_SUB_TRIES`] sub-tries, [`SYNC_RETRY_DELAY`] apart.
    /// Returns the device-reported `read_mode` byte on success.
    async fn sync_packet_number(&mut self) -> Result<u8, SessionError> {
        for _ in 0..SYNC_SUB_TRIES {
            match self.send_and_wait(FUNC_SYNC_OR_MODE, &[]).await {
                Ok(frame) if frame_is_valid(&frame, FUNC_SYNC_OR_MODE).is_ok() => {
                    return Ok(frame.payload.last().copied().unwrap_or(0));
                }
                _ => tokio::time::sleep(SYNC_RETRY_DELAY).await,
            }
        }
        Err(SessionError::SyncExhausted { tries: SYNC_SUB_TRIES })
    }

    async fn read_current_temp(&mut self) -> Result<u16, SessionError> {
        let frame = self.send_and_wait(FUNC_TEMP, &[]).await?;
        frame_is_valid(&frame, FUNC_TEMP)?;
        let lo = *frame.payload.first().ok_or(SessionError::DeviceError { function: FUNC_TEMP })?;
        let hi = *frame.payload.get(1).ok_or(SessionError::DeviceError { function: FUNC_TEMP })?;
        Ok((hi as u16) << 8 | lo as u16)
    }

    async fn write_comfort_mode(&mut self, read_mode: u8) -> Result<(), SessionError> {
        let payload = [0x01, 0, 0, 0, 0, 0, 0, 0x01, 0, 0, 0, read_mode];
        let frame = self.send_and_wait(FUNC_SYNC_OR_MODE, &payload).await?;
        frame_is_valid(&frame, FUNC_SYNC_OR_MODE)?;
        Ok(())
    }

    /// Writes the set-point for `desired_on` and returns the deci-degree
    /// value it wrote, for the verify step to compare against.
    async fn write_set_point(&mut self, desired_on: bool) -> Result<u16, SessionError> {
        let temp_c = if desired_on { self.on_temp_c } else { self.off_temp_c };
        let deci = temp_c as u16 * 10;
        let lo = (deci & 0xFF) as u8;
        let hi = ((deci >> 8) & 0xFF) as u8;
        let payload = [lo, hi, lo, hi, 0, 0, 0, 0, 0, 0, 0, 0];
        let frame = self.send_and_wait(FUNC_TEMP, &payload).await?;
        frame_is_valid(&frame, FUNC_TEMP)?;
        Ok(deci)
    }

    fn wrap_increment(current: u8) -> u8 {
        if current >= 255 {
            1
        } else {
            current + 1
        }
    }

    /// Encodes and writes one frame, then waits up to `response_timeout` for
    /// a correlated response. See §4.C "Response correlation": only a
    /// response bearing the packet number just sent is accepted.
    async fn send_and_wait(&mut self, function: u8, payload: &[u8]) -> Result<DecodedFrame, SessionError> {
        self.next_pkt = Self::wrap_increment(self.next_pkt);
        let expected_pkt = self.next_pkt;

        {
            let pending = self.pending.as_ref().expect("attempt in progress");
            let mut state = pending.lock().await;
            state.expected_pkt = expected_pkt;
            state.response = None;
            state.mismatched_pkt = None;
        }

        let frame = codec::encode(function, expected_pkt, payload);
        self.transport.gatt_write(WRITE_HANDLE, &frame, WRITE_TIMEOUT).await?;

        let notify = self.notify.as_ref().expect("attempt in progress").clone();
        let waited = tokio::time::timeout(self.response_timeout, notify.notified()).await;
        if waited.is_err() {
            return Err(SessionError::ResponseTimeout { function });
        }

        let pending = self.pending.as_ref().expect("attempt in progress");
        let mut state = pending.lock().await;
        match state.response.take() {
            Some(frame) => Ok(frame),
            None => Err(SessionError::PacketNumberMismatch {
                expected: expected_pkt,
                got: state.mismatched_pkt.take().unwrap_or(0),
            }),
        }
    }
}

fn frame_is_valid(frame: &DecodedFrame, function: u8) -> Result<(), SessionError> {
    if frame.is_device_error {
        return Err(SessionError::DeviceError { function });
    }
    if !frame.ok {
        return Err(SessionError::ChecksumFailed { function });
    }
    Ok(())
}

fn spawn_reader(
    mut notify_rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
    pending: Arc<Mutex<PendingState>>,
    notify: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reassembler = Reassembler::new();
        while let Some(chunk) = notify_rx.recv().await {
            let Some(result) = reassembler.feed(&chunk) else {
                continue;
            };
            let Ok(frame) = result else {
                // Malformed input (short/bad magic/length mismatch): dropped
                // silently per §7, no wakeup.
                continue;
            };
            let mut state = pending.lock().await;
            if frame.packet_number == state.expected_pkt {
                state.response = Some(frame);
            } else {
                log::debug!(
                    "dropping response with packet number {} (expected {})",
                    frame.packet_number,
                    state.expected_pkt
                );
                state.mismatched_pkt = Some(frame.packet_number);
            }
            drop(state);
            notify.notify_one();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProxyTransport;

    fn mac() -> MacAddress {
        MacAddress::parse("62:00:a1:1e:c1:1f").unwrap()
    }

    /// Builds a scripted response for `function` at `packet_number` with the
    /// given payload, ok checksum, as the fake transport's reader would see
    /// it arrive as a single notification chunk.
    fn scripted_response(function: u8, packet_number: u8, payload: &[u8]) -> Vec<u8> {
        codec::encode(function, packet_number, payload)
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_runs_to_completion() {
        // sync (pkt 1) -> read temp (pkt 2) -> write mode (pkt 3) ->
        // write setpoint (pkt 4) -> verify read (pkt 5)
        let responses = vec![
            scripted_response(0x01, 1, &[0x00]),
            scripted_response(0x0C, 2, &[0x46, 0x00]), // current = 70 deci (7.0C)
            scripted_response(0x01, 3, &[]),
            scripted_response(0x0C, 4, &[]),
            scripted_response(0x0C, 5, &[0x5E, 0x01]), // 350 deci == on_temp_c(35) * 10
        ];
        let transport = FakeProxyTransport::new(responses);
        let mut session = ValveSession::new(transport, mac(), 35, 7)
            .with_response_timeout(Duration::from_millis(200));

        assert!(session.run_set_state(true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_mismatch_fails_the_attempt() {
        let responses = vec![
            scripted_response(0x01, 1, &[0x00]),
            scripted_response(0x0C, 2, &[0x46, 0x00]),
            scripted_response(0x01, 3, &[]),
            scripted_response(0x0C, 4, &[]),
            scripted_response(0x0C, 5, &[0x00, 0x00]), // wrong read-back, every attempt
        ];
        // Five identical failing attempts, budget exhausted.
        let mut all_responses = Vec::new();
        for _ in 0..5 {
            all_responses.extend(responses.clone());
        }
        let transport = FakeProxyTransport::new(all_responses);
        let mut session = ValveSession::new(transport, mac(), 35, 7)
            .with_response_timeout(Duration::from_millis(50));

        assert!(!session.run_set_state(true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn response_timeout_exhausts_sync_sub_tries() {
        // No scripted responses at all: every send times out.
        let transport = FakeProxyTransport::new(vec![]);
        let mut session = ValveSession::new(transport, mac(), 35, 7)
            .with_response_timeout(Duration::from_millis(20));

        assert!(!session.run_set_state(true).await);
    }

    #[test]
    fn packet_number_wraps_from_254() {
        assert_eq!(ValveSession::<FakeProxyTransport>::wrap_increment(254), 255);
        assert_eq!(ValveSession::<FakeProxyTransport>::wrap_increment(255), 1);
        assert_eq!(ValveSession::<FakeProxyTransport>::wrap_increment(1), 2);
    }
}
