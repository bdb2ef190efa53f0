//! Per-subsystem error types.
//!
//! Each fallible subsystem gets its own `thiserror` enum so callers (and
//! tests) can match on precise variants. `main` is the only place that
//! collapses these into `anyhow::Error`.

use thiserror::Error;

/// Frame Codec failures (§4.A, §7).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("bad start marker: {0:02x} {1:02x}")]
    BadMagic(u8, u8),
    #[error("declared length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: u8, actual: usize },
}

/// Valve Session failures (§4.C, §7). A `SessionError` fails the current
/// attempt; the session retries unless its attempt budget is exhausted.
///
/// Doesn't derive `PartialEq`/`Clone`: the `Transport` variant wraps
/// `std::io::Error`, which supports neither. Tests match on variants
/// directly instead of comparing whole errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("packet number sync exhausted after {tries} sub-tries")]
    SyncExhausted { tries: u32 },
    #[error("response timed out waiting for function {function:02x}")]
    ResponseTimeout { function: u8 },
    #[error("response carried packet number {got}, expected {expected}")]
    PacketNumberMismatch { expected: u8, got: u8 },
    #[error("device reported an error frame for function {function:02x}")]
    DeviceError { function: u8 },
    #[error("response to function {function:02x} failed checksum verification")]
    ChecksumFailed { function: u8 },
    #[error("read-back verification mismatch: wrote {wrote} deci-degrees, read back {read_back}")]
    VerifyMismatch { wrote: u16, read_back: u16 },
    #[error("frame codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("proxy transport error: {0}")]
    Transport(#[from] ProxyRpcError),
}

/// Proxy RPC transport failures (§4.D, §7).
#[derive(Debug, Error)]
pub enum ProxyRpcError {
    #[error("i/o error talking to proxy: {0}")]
    Io(#[from] std::io::Error),
    #[error("proxy disconnected mid-operation")]
    Disconnected,
    #[error("proxy rejected request: {0}")]
    Rejected(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Configuration load/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate valve name: {0}")]
    DuplicateValveName(String),
    #[error("valve {valve} has invalid mac address {mac}: {reason}")]
    InvalidMac {
        valve: String,
        mac: String,
        reason: String,
    },
    #[error("valve {valve} references unknown proxy hostname {hostname}")]
    UnknownProxy { valve: String, hostname: String },
}

/// Bus Adapter failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("not connected to the message bus")]
    NotConnected,
}
