//! Error taxonomy.
//!
//! Every class here is caught at its own granularity (per message, per field,
//! per frame, per adapter cycle) and logged.  Only [`StartupError`] ever
//! reaches `main`.

use std::path::PathBuf;

/// Bus I/O failure.  The sender retries once, then drops the message.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open I2C bus {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("I2C write to 0x{address:02X} failed: {reason}")]
    Write { address: u8, reason: String },
}

/// Media source failure.  Marks the adapter disconnected until the next
/// successful `connect()`.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{source_name}: not connected")]
    NotConnected { source_name: &'static str },
    #[error("{source_name}: connection failed: {reason}")]
    Connect {
        source_name: &'static str,
        reason: String,
    },
    #[error("{source_name}: protocol error: {reason}")]
    Protocol {
        source_name: &'static str,
        reason: String,
    },
    #[error("{source_name}: I/O error: {error}")]
    Io {
        source_name: &'static str,
        #[source]
        error: std::io::Error,
    },
    #[error("bluetooth: D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
}

/// A spectrum frame that could not be decoded.  The frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("short spectrum frame: got {got} of {expected} bytes")]
    ShortFrame { got: usize, expected: usize },
    #[error("spectrum read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A single field that cannot be put on the wire.  Only that field is
/// skipped.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("field 0x{header:02X} payload is {len} bytes, exceeds the length prefix")]
    PayloadTooLong { header: u8, len: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse {path}: {error}")]
    Parse {
        path: PathBuf,
        #[source]
        error: serde_json::Error,
    },
    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// GPIO / display resources that could not be claimed.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("GPIO error on {what}: {reason}")]
    Gpio { what: String, reason: String },
    #[error("OLED {panel} initialisation failed: {reason}")]
    Display { panel: &'static str, reason: String },
}

/// Anything that aborts the process before the main loop starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("failed to start spectrum process `{command}`: {error}")]
    Spectrum {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to install signal handlers: {0}")]
    Signals(std::io::Error),
    #[error("failed to spawn {name} thread: {error}")]
    Thread {
        name: String,
        #[source]
        error: std::io::Error,
    },
}
