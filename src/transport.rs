//! I2C transport to the display microcontroller.
//!
//! [`I2cSender`] owns the bus handle behind a mutex so the main loop, the
//! media pollers and the encoder workers can all share one `Arc<dyn Transport>`.
//! A failed write reopens the bus and retries exactly once; a second failure
//! drops the message.

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::protocol::Header;

/// Anything that can deliver a `(header, payload)` message.
pub trait Transport: Send + Sync {
    fn send(&self, header: Header, payload: &[u8]) -> Result<(), TransportError>;
}

/// A raw bus handle that can be torn down and reopened.
pub trait I2cLink: Send {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), TransportError>;
    fn reopen(&mut self) -> Result<(), TransportError>;
}

/// `/dev/i2c-N` character device.
pub struct LinuxI2c {
    path: String,
    dev: linux_embedded_hal::I2cdev,
}

impl LinuxI2c {
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let dev = open_i2cdev(path)?;
        Ok(Self {
            path: path.to_string(),
            dev,
        })
    }
}

fn open_i2cdev(path: &str) -> Result<linux_embedded_hal::I2cdev, TransportError> {
    linux_embedded_hal::I2cdev::new(path).map_err(|e| TransportError::Open {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

impl I2cLink for LinuxI2c {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), TransportError> {
        use embedded_hal::i2c::I2c;

        self.dev
            .write(address, bytes)
            .map_err(|e| TransportError::Write {
                address,
                reason: format!("{e:?}"),
            })
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.dev = open_i2cdev(&self.path)?;
        Ok(())
    }
}

/// Block-write sender bound to a fixed 7-bit address.
pub struct I2cSender<L: I2cLink> {
    address: u8,
    link: Mutex<L>,
}

impl<L: I2cLink> I2cSender<L> {
    pub fn new(link: L, address: u8) -> Self {
        Self {
            address,
            link: Mutex::new(link),
        }
    }
}

impl<L: I2cLink> Transport for I2cSender<L> {
    fn send(&self, header: Header, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(header);
        frame.extend_from_slice(payload);

        let mut link = self.link.lock();
        match link.write(self.address, &frame) {
            Ok(()) => {
                log::debug!("I2C data sent - header 0x{header:02X}, data {payload:?}");
                Ok(())
            }
            Err(first) => {
                log::error!("I2C communication error: {first}");
                let retry = link
                    .reopen()
                    .and_then(|()| link.write(self.address, &frame));
                if let Err(e) = &retry {
                    log::error!("I2C recovery failed, dropping 0x{header:02X}: {e}");
                }
                retry
            }
        }
    }
}

/// Discards everything.  Used when the I2C output is disabled and only the
/// local OLED panels are driven.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, header: Header, payload: &[u8]) -> Result<(), TransportError> {
        log::trace!("I2C disabled, discarding 0x{header:02X} ({} bytes)", payload.len());
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every message; can be told to fail the next N sends.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<(Header, Vec<u8>)>>,
        failures: AtomicUsize,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }

        pub fn take(&self) -> Vec<(Header, Vec<u8>)> {
            std::mem::take(&mut *self.sent.lock())
        }

        pub fn texts(&self) -> Vec<(Header, String)> {
            self.take()
                .into_iter()
                .map(|(h, p)| (h, String::from_utf8_lossy(&p[1..]).into_owned()))
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, header: Header, payload: &[u8]) -> Result<(), TransportError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Write {
                    address: 0x13,
                    reason: "injected".into(),
                });
            }
            self.sent.lock().push((header, payload.to_vec()));
            Ok(())
        }
    }
}
