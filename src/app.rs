//! Process lifecycle: setup, the main spectrum loop, and teardown.
//!
//! The main loop is single-threaded: read one spectrum frame, forward it,
//! re-evaluate the sleep flag, pause.  Media pollers and encoder workers
//! run on their own threads and share the transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{Config, EncoderConfig, I2cConfig};
use crate::control::{ControlTarget, EncoderRole, wire_encoder};
use crate::dispatch::Dispatcher;
use crate::encoder::EncoderWorker;
use crate::error::{DecodeError, HardwareError, StartupError};
use crate::gpio::{GpioChip, Led};
use crate::idle::SleepMonitor;
use crate::media::{
    BluetoothSource, MediaSource, MpdSource, PollTiming, PollerHandle, spawn_poller,
};
use crate::oled::DualOled;
use crate::protocol::{FieldMap, SLEEP_MODE_HEADER, SPECTRUM_HEADER};
use crate::spectrum::{SpectrumFrame, SpectrumProcess};
use crate::transport::{I2cSender, LinuxI2c, NullTransport, Transport};

/// Cleared by SIGINT/SIGTERM.
static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_signal(_signal: libc::c_int) {
    RUNNING.store(false, Ordering::Release);
}

fn install_signal_handlers() -> Result<(), StartupError> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only stores to an atomic, which is
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            return Err(StartupError::Signals(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn open_transport(config: &I2cConfig) -> Result<Arc<dyn Transport>, StartupError> {
    if !config.enabled {
        log::info!("I2C output disabled");
        return Ok(Arc::new(NullTransport));
    }
    let link = LinuxI2c::open(&config.bus_path)?;
    log::info!(
        "I2C bus {} open, display at 0x{:02X}",
        config.bus_path,
        config.address
    );
    Ok(Arc::new(I2cSender::new(link, config.address)))
}

struct EncoderThreads {
    name: String,
    reader: JoinHandle<()>,
    worker: JoinHandle<()>,
}

pub struct App {
    config: Config,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    monitor: SleepMonitor,
    spectrum: Option<SpectrumProcess>,
    pollers: Vec<PollerHandle>,
    encoders: Vec<EncoderThreads>,
    /// Keeps the GPIO reader threads alive; cleared to detach them.
    readers_running: Arc<AtomicBool>,
    led: Option<Led>,
    oled: Option<DualOled>,
    oled_blank: bool,
}

impl App {
    /// Acquire every resource.  On failure whatever was already acquired is
    /// released before the error is returned.
    pub fn start(config: Config) -> Result<Self, StartupError> {
        let transport = open_transport(&config.i2c)?;
        let dispatcher = Arc::new(Dispatcher::new(
            FieldMap::media(),
            config.dispatch.max_length,
            transport.clone(),
        ));
        let mut app = Self {
            config,
            transport,
            dispatcher,
            monitor: SleepMonitor::new(),
            spectrum: None,
            pollers: Vec::new(),
            encoders: Vec::new(),
            readers_running: Arc::new(AtomicBool::new(true)),
            led: None,
            oled: None,
            oled_blank: false,
        };

        if let Err(e) = app.bring_up() {
            log::error!("Startup failed: {e}; releasing acquired resources");
            app.shutdown();
            return Err(e);
        }
        Ok(app)
    }

    fn bring_up(&mut self) -> Result<(), StartupError> {
        install_signal_handlers()?;

        let sources = self.media_sources();
        let gpio = &self.config.gpio;
        let needs_gpio =
            !gpio.encoders.is_empty() || gpio.led_pin.is_some() || self.config.oled.enabled;

        if needs_gpio {
            let mut chip = GpioChip::open(&gpio.chip)?;
            if let Some(pin) = gpio.led_pin {
                self.led = Some(Led::on(&mut chip, pin, gpio.led_duty)?);
                log::info!("Power LED on (GPIO {pin}, {}% duty)", gpio.led_duty);
            }

            let target = Arc::new(ControlTarget::new(sources.clone()));
            let encoders = gpio.encoders.clone();
            for (index, encoder) in encoders.iter().enumerate() {
                let threads = start_encoder(
                    &mut chip,
                    encoder,
                    EncoderRole::for_index(index),
                    target.clone(),
                    self.transport.clone(),
                    self.readers_running.clone(),
                )?;
                self.encoders.push(threads);
            }

            if self.config.oled.enabled {
                self.oled = optional(DualOled::open(&self.config.oled, &mut chip), "OLED");
            }
        }

        self.spectrum = Some(SpectrumProcess::spawn(&self.config.spectrum)?);

        for source in sources {
            let name = source.kind().label();
            let poller = spawn_poller(source, self.dispatcher.clone(), PollTiming::default())
                .map_err(|error| StartupError::Thread {
                    name: format!("{name} poller"),
                    error,
                })?;
            self.pollers.push(poller);
        }

        log::info!(
            "Started: {} encoder(s), {} media source(s)",
            self.encoders.len(),
            self.pollers.len()
        );
        Ok(())
    }

    fn media_sources(&self) -> Vec<Arc<dyn MediaSource>> {
        let mut sources: Vec<Arc<dyn MediaSource>> = Vec::new();
        if self.config.mpd.enabled {
            sources.push(Arc::new(MpdSource::new(self.config.mpd.clone())));
        }
        if self.config.bluetooth.enabled {
            sources.push(Arc::new(BluetoothSource::new()));
        }
        sources
    }

    /// Run until a signal arrives or the spectrum stream ends, then tear
    /// everything down.
    pub fn run(mut self) {
        let tick = Duration::from_millis(self.config.tick_ms);
        log::info!("Running, tick {} ms", self.config.tick_ms);

        while RUNNING.load(Ordering::Acquire) {
            let Some(spectrum) = self.spectrum.as_mut() else {
                break;
            };
            let frame = match spectrum.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::error!("Spectrum stream ended");
                    break;
                }
                Err(e @ DecodeError::ShortFrame { .. }) => {
                    log::warn!("{e}");
                    continue;
                }
                Err(e) => {
                    log::error!("Spectrum read failed: {e}");
                    break;
                }
            };
            self.tick(&frame);
            std::thread::sleep(tick);
        }

        log::info!("Shutting down");
        self.shutdown();
    }

    fn tick(&mut self, frame: &SpectrumFrame) {
        let states: Vec<Option<String>> = self.pollers.iter().map(|p| p.state()).collect();
        forward_frame(self.transport.as_ref(), &mut self.monitor, &states, frame);

        if let Some(oled) = self.oled.as_mut() {
            let result = if self.monitor.is_sleeping() {
                if self.oled_blank {
                    Ok(())
                } else {
                    self.oled_blank = true;
                    oled.clear()
                }
            } else {
                self.oled_blank = false;
                oled.render(frame)
            };
            if let Err(e) = result {
                log::warn!("{e}");
            }
        }
    }

    /// Best-effort release, in dependency order.  Each step logs its own
    /// failure and carries on.
    fn shutdown(&mut self) {
        self.readers_running.store(false, Ordering::Release);
        for threads in self.encoders.drain(..) {
            // The reader owns the only sender, so the worker follows it out.
            if threads.reader.join().is_err() {
                log::error!("GPIO reader for encoder {} panicked", threads.name);
            }
            if threads.worker.join().is_err() {
                log::error!("Encoder {} worker panicked", threads.name);
            }
        }

        for poller in self.pollers.drain(..) {
            poller.stop();
        }

        if let Some(spectrum) = self.spectrum.take() {
            spectrum.terminate();
        }

        if let Some(mut oled) = self.oled.take()
            && let Err(e) = oled.clear()
        {
            log::warn!("{e}");
        }

        if let Some(led) = self.led.take() {
            led.off();
        }
        log::info!("Cleanup complete");
    }
}

/// Hardware the bridge can run without: a failure is logged, not fatal.
fn optional<T>(opened: Result<T, HardwareError>, what: &str) -> Option<T> {
    opened
        .inspect_err(|e| log::warn!("{e}; continuing without {what} output"))
        .ok()
}

/// Send the spectrum unconditionally, then the sleep flag if it flipped.
fn forward_frame(
    transport: &dyn Transport,
    monitor: &mut SleepMonitor,
    states: &[Option<String>],
    frame: &SpectrumFrame,
) {
    // Transport errors are already logged by the sender.
    let _ = transport.send(SPECTRUM_HEADER, frame.as_bytes());

    if let Some(flag) = monitor.update(states.iter().map(|s| s.as_deref())) {
        match transport.send(SLEEP_MODE_HEADER, &[flag]) {
            Ok(()) => log::info!("Sleep mode -> {flag}"),
            Err(_) => monitor.revert(),
        }
    }
}

fn start_encoder(
    chip: &mut GpioChip,
    config: &EncoderConfig,
    role: EncoderRole,
    target: Arc<ControlTarget>,
    transport: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
) -> Result<EncoderThreads, StartupError> {
    let name = format!("0x{:02X}", config.encoder_header);
    let thread_err = |what: &str, error| StartupError::Thread {
        name: format!("encoder {name} {what}"),
        error,
    };

    let lines = chip.encoder_lines(config)?;
    let (initial, switch_high) = lines.initial_state()?;
    let (tx, rx) = mpsc::channel();

    let worker = EncoderWorker::new(config, initial, switch_high, transport.clone());
    let worker = wire_encoder(worker, role, target, transport)
        .spawn(rx)
        .map_err(|e| thread_err("worker", e))?;
    // If the reader fails to start, `tx` is dropped with it and the worker
    // exits on its own.
    let reader = lines
        .spawn_reader(tx, running)
        .map_err(|e| thread_err("reader", e))?;

    log::info!(
        "Encoder {name} on GPIO {}/{}/{} ({role:?})",
        config.clk,
        config.dt,
        config.sw
    );
    Ok(EncoderThreads {
        name,
        reader,
        worker,
    })
}
