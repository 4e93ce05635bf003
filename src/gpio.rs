//! GPIO character-device access.
//!
//! Each encoder gets one reader thread that owns its three event lines
//! (clk, dt, switch).  On any edge it samples the levels and pushes an
//! [`EncoderEvent`] to the encoder's worker.  Reads are gated by `poll()`
//! with a short timeout so the thread notices shutdown promptly; dropping
//! the handles detaches the edge detection.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;

use linux_embedded_hal::gpio_cdev::{
    Chip, EventRequestFlags, LineEventHandle, LineHandle, LineRequestFlags,
};

use crate::config::EncoderConfig;
use crate::encoder::{EncoderEvent, PinState, RotaryLine};
use crate::error::HardwareError;

const CONSUMER: &str = "vizbridge";
const POLL_TIMEOUT_MS: libc::c_int = 100;

pub struct GpioChip {
    path: String,
    chip: Chip,
}

impl GpioChip {
    pub fn open(path: &str) -> Result<Self, HardwareError> {
        let chip = Chip::new(path).map_err(|e| gpio_err(path, e))?;
        Ok(Self {
            path: path.to_string(),
            chip,
        })
    }

    /// Claim a line as an output driven to `value`.
    pub fn output(&mut self, pin: u32, value: u8) -> Result<LineHandle, HardwareError> {
        let what = format!("{} line {pin}", self.path);
        self.chip
            .get_line(pin)
            .and_then(|line| line.request(LineRequestFlags::OUTPUT, value, CONSUMER))
            .map_err(|e| gpio_err(&what, e))
    }

    fn edge_input(&mut self, pin: u32) -> Result<LineEventHandle, HardwareError> {
        let what = format!("{} line {pin}", self.path);
        self.chip
            .get_line(pin)
            .and_then(|line| {
                line.events(
                    LineRequestFlags::INPUT,
                    EventRequestFlags::BOTH_EDGES,
                    CONSUMER,
                )
            })
            .map_err(|e| gpio_err(&what, e))
    }

    /// Claim the clk/dt/switch lines of one encoder for both-edge events.
    ///
    /// The pins need pull-ups (external, or `gpio=<pins>=pu` in
    /// `config.txt`); the v1 cdev ABI cannot set bias.
    pub fn encoder_lines(&mut self, config: &EncoderConfig) -> Result<EncoderLines, HardwareError> {
        Ok(EncoderLines {
            name: format!("{:02x}", config.encoder_header),
            clk: self.edge_input(config.clk)?,
            dt: self.edge_input(config.dt)?,
            sw: self.edge_input(config.sw)?,
        })
    }
}

fn gpio_err(what: &str, e: impl std::fmt::Display) -> HardwareError {
    HardwareError::Gpio {
        what: what.to_string(),
        reason: e.to_string(),
    }
}

pub struct EncoderLines {
    name: String,
    clk: LineEventHandle,
    dt: LineEventHandle,
    sw: LineEventHandle,
}

impl EncoderLines {
    /// Current `(clk, dt)` pair and whether the switch line is high.
    pub fn initial_state(&self) -> Result<(PinState, bool), HardwareError> {
        let state = self.sample_rotary()?;
        let sw = self
            .sw
            .get_value()
            .map_err(|e| gpio_err(&format!("encoder {} switch", self.name), e))?;
        Ok((state, sw != 0))
    }

    fn sample_rotary(&self) -> Result<PinState, HardwareError> {
        let what = || format!("encoder {}", self.name);
        let clk = self.clk.get_value().map_err(|e| gpio_err(&what(), e))?;
        let dt = self.dt.get_value().map_err(|e| gpio_err(&what(), e))?;
        Ok(PinState::new(clk != 0, dt != 0))
    }

    /// Start the reader thread.  It exits once `running` is cleared or the
    /// worker hangs up, releasing the lines.
    pub fn spawn_reader(
        self,
        events: Sender<EncoderEvent>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let name = format!("gpio-{}", self.name);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.read_loop(events, running))
    }

    fn read_loop(mut self, events: Sender<EncoderEvent>, running: Arc<AtomicBool>) {
        let mut fds = [
            pollfd(self.clk.as_raw_fd()),
            pollfd(self.dt.as_raw_fd()),
            pollfd(self.sw.as_raw_fd()),
        ];

        while running.load(Ordering::Acquire) {
            for fd in fds.iter_mut() {
                fd.revents = 0;
            }
            // SAFETY: `fds` is a valid, exclusively borrowed array of pollfd
            // whose descriptors stay open for the lifetime of `self`.
            let ready = unsafe {
                libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_TIMEOUT_MS)
            };
            if ready < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("GPIO poll failed for encoder {}: {err}", self.name);
                break;
            }
            if ready == 0 {
                continue;
            }

            for (idx, fd) in fds.iter().enumerate() {
                if fd.revents & libc::POLLIN == 0 {
                    continue;
                }
                let handle = match idx {
                    0 => &mut self.clk,
                    1 => &mut self.dt,
                    _ => &mut self.sw,
                };
                let timestamp_ns = match handle.get_event() {
                    Ok(ev) => ev.timestamp(),
                    Err(e) => {
                        log::warn!("GPIO event read failed for encoder {}: {e}", self.name);
                        continue;
                    }
                };
                let event = match idx {
                    0 | 1 => {
                        let line = if idx == 0 {
                            RotaryLine::Clk
                        } else {
                            RotaryLine::Dt
                        };
                        match self.sample_rotary() {
                            Ok(state) => EncoderEvent::Rotary {
                                line,
                                state,
                                timestamp_ns,
                            },
                            Err(e) => {
                                log::warn!("Rotary sample failed: {e}");
                                continue;
                            }
                        }
                    }
                    _ => match self.sw.get_value() {
                        Ok(v) => EncoderEvent::Switch {
                            level_high: v != 0,
                            timestamp_ns,
                        },
                        Err(e) => {
                            log::warn!("Switch sample failed for encoder {}: {e}", self.name);
                            continue;
                        }
                    },
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }
        log::debug!("GPIO reader for encoder {} detached", self.name);
    }
}

fn pollfd(fd: libc::c_int) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Software-PWM period for the power LED (100 Hz).
const LED_PERIOD: Duration = Duration::from_millis(10);

/// On/off split of one PWM period for `duty` percent.
fn pwm_split(duty: u8, period: Duration) -> (Duration, Duration) {
    let on = period * u32::from(duty.min(100)) / 100;
    (on, period - on)
}

/// Power LED, lit while the process runs.
///
/// Below 100% duty a background thread toggles the line.
pub struct Led {
    handle: Arc<LineHandle>,
    pwm: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl Led {
    pub fn on(chip: &mut GpioChip, pin: u32, duty: u8) -> Result<Self, HardwareError> {
        let handle = Arc::new(chip.output(pin, 1)?);
        if duty >= 100 {
            return Ok(Self { handle, pwm: None });
        }

        let running = Arc::new(AtomicBool::new(true));
        let (line, flag) = (handle.clone(), running.clone());
        let pwm = std::thread::Builder::new()
            .name("led-pwm".into())
            .spawn(move || pwm_loop(&line, duty, &flag));
        match pwm {
            Ok(thread) => Ok(Self {
                handle,
                pwm: Some((running, thread)),
            }),
            Err(e) => {
                log::warn!("LED PWM thread failed to start ({e}); driving it fully on");
                Ok(Self { handle, pwm: None })
            }
        }
    }

    pub fn off(self) {
        if let Some((running, thread)) = self.pwm {
            running.store(false, Ordering::Release);
            if thread.join().is_err() {
                log::error!("LED PWM thread panicked");
            }
        }
        if let Err(e) = self.handle.set_value(0) {
            log::warn!("Failed to switch LED off: {e}");
        }
    }
}

fn pwm_loop(line: &LineHandle, duty: u8, running: &AtomicBool) {
    let (on, off) = pwm_split(duty, LED_PERIOD);
    while running.load(Ordering::Acquire) {
        let result = line.set_value(1).and_then(|()| {
            std::thread::sleep(on);
            line.set_value(0)
        });
        if let Err(e) = result {
            log::warn!("LED PWM stopped: {e}");
            return;
        }
        std::thread::sleep(off);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pwm_split() {
        let period = Duration::from_millis(10);
        assert_eq!(
            pwm_split(80, period),
            (Duration::from_millis(8), Duration::from_millis(2))
        );
        assert_eq!(pwm_split(100, period), (period, Duration::ZERO));
        assert_eq!(pwm_split(250, period), (period, Duration::ZERO));
        assert_eq!(pwm_split(0, period), (Duration::ZERO, period));
    }
}
