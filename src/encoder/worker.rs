//! Per-encoder consumer thread.
//!
//! The GPIO reader pushes sampled pin levels onto a channel; this worker is
//! the only owner of the encoder's decode state, so no locking is needed
//! against re-entrant edge callbacks.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use super::decoder::{
    Direction, EdgeFilter, PinState, QuadratureDecoder, RotaryLine, SwitchDebouncer,
};
use crate::config::EncoderConfig;
use crate::protocol::Header;
use crate::transport::Transport;

/// Raw sample taken on a GPIO edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderEvent {
    /// `line` is the line whose edge triggered the sample.
    Rotary {
        line: RotaryLine,
        state: PinState,
        timestamp_ns: u64,
    },
    Switch {
        level_high: bool,
        timestamp_ns: u64,
    },
}

pub type RotationHandler = Box<dyn Fn(Direction) + Send>;
pub type SwitchHandler = Box<dyn Fn(bool) + Send>;

pub struct EncoderWorker {
    encoder_header: Header,
    switch_header: Header,
    decoder: QuadratureDecoder,
    rotary_filter: EdgeFilter,
    switch: SwitchDebouncer,
    transport: Arc<dyn Transport>,
    on_rotate: Option<RotationHandler>,
    on_switch: Option<SwitchHandler>,
}

impl EncoderWorker {
    pub fn new(
        config: &EncoderConfig,
        initial: PinState,
        switch_level_high: bool,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            encoder_header: config.encoder_header,
            switch_header: config.switch_header,
            decoder: QuadratureDecoder::new(initial, config.steps_per_detent, config.positions),
            rotary_filter: EdgeFilter::new(config.rotary_debounce_ms),
            switch: SwitchDebouncer::new(switch_level_high, config.switch_debounce_ms),
            transport,
            on_rotate: None,
            on_switch: None,
        }
    }

    pub fn on_rotate(mut self, handler: impl Fn(Direction) + Send + 'static) -> Self {
        self.on_rotate = Some(Box::new(handler));
        self
    }

    /// Called with `true` on press, `false` on release.
    pub fn on_switch(mut self, handler: impl Fn(bool) + Send + 'static) -> Self {
        self.on_switch = Some(Box::new(handler));
        self
    }

    pub fn handle(&mut self, event: EncoderEvent) {
        match event {
            EncoderEvent::Rotary {
                line,
                state,
                timestamp_ns,
            } => {
                if !self.rotary_filter.accept(line, timestamp_ns) {
                    return;
                }
                let Some(detent) = self.decoder.update(state) else {
                    return;
                };
                if let Err(e) = self.transport.send(self.encoder_header, &[detent.value]) {
                    log::warn!("Encoder 0x{:02X} value not delivered: {e}", self.encoder_header);
                }
                if let Some(handler) = &self.on_rotate {
                    handler(detent.direction);
                }
                log::info!(
                    "Encoder 0x{:02X}: {} value: {}",
                    self.encoder_header,
                    detent.direction.label(),
                    detent.value
                );
            }
            EncoderEvent::Switch {
                level_high,
                timestamp_ns,
            } => {
                for &pressed in self.switch.update(level_high, timestamp_ns) {
                    self.report_switch(pressed);
                }
            }
        }
    }

    fn report_switch(&self, pressed: bool) {
        if let Err(e) = self.transport.send(self.switch_header, &[u8::from(pressed)]) {
            log::warn!("Switch 0x{:02X} state not delivered: {e}", self.switch_header);
        }
        if let Some(handler) = &self.on_switch {
            handler(pressed);
        }
        log::info!(
            "Switch 0x{:02X}: {}",
            self.switch_header,
            if pressed { "Pressed" } else { "Released" }
        );
    }

    /// Consume events until every sender is gone.
    pub fn spawn(mut self, events: Receiver<EncoderEvent>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("encoder-{:02x}", self.encoder_header))
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    self.handle(event);
                }
                log::debug!("Encoder 0x{:02X} worker stopped", self.encoder_header);
            })
    }
}
