//! Which media source the encoder controls act on.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::encoder::{Direction, EncoderWorker};
use crate::media::{MediaSource, SourceKind};
use crate::protocol::SOURCE_HEADER;
use crate::transport::Transport;

pub struct ControlTarget {
    sources: Vec<Arc<dyn MediaSource>>,
    index: AtomicUsize,
}

impl ControlTarget {
    pub fn new(sources: Vec<Arc<dyn MediaSource>>) -> Self {
        Self {
            sources,
            index: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> Option<&Arc<dyn MediaSource>> {
        if self.sources.is_empty() {
            return None;
        }
        self.sources
            .get(self.index.load(Ordering::Acquire) % self.sources.len())
    }

    /// Move to the next source and return its kind.
    pub fn cycle(&self) -> Option<SourceKind> {
        if self.sources.is_empty() {
            return None;
        }
        let len = self.sources.len();
        let prev = self
            .index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or(0);
        self.sources.get((prev + 1) % len).map(|s| s.kind())
    }

    pub fn with_current(&self, action: impl FnOnce(&dyn MediaSource)) {
        match self.current() {
            Some(source) => action(source.as_ref()),
            None => log::debug!("No media source to control"),
        }
    }
}

/// What an encoder does besides reporting its own value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderRole {
    /// Rotation skips tracks, the switch toggles play/pause.
    Transport,
    /// The switch cycles the controlled source.
    SourceSelect,
    Passive,
}

impl EncoderRole {
    /// Role by position in the configured encoder list.
    pub fn for_index(index: usize) -> Self {
        match index {
            0 => EncoderRole::Transport,
            1 => EncoderRole::SourceSelect,
            _ => EncoderRole::Passive,
        }
    }
}

pub fn wire_encoder(
    worker: EncoderWorker,
    role: EncoderRole,
    target: Arc<ControlTarget>,
    transport: Arc<dyn Transport>,
) -> EncoderWorker {
    match role {
        EncoderRole::Transport => {
            let on_switch = target.clone();
            worker
                .on_rotate(move |direction| {
                    target.with_current(|source| match direction {
                        Direction::Clockwise => source.next(),
                        Direction::CounterClockwise => source.previous(),
                    })
                })
                .on_switch(move |pressed| {
                    if pressed {
                        on_switch.with_current(|source| source.toggle_play_pause());
                    }
                })
        }
        EncoderRole::SourceSelect => worker.on_switch(move |pressed| {
            if !pressed {
                return;
            }
            let Some(kind) = target.cycle() else {
                return;
            };
            log::info!("Control target: {}", kind.label());
            if let Err(e) = transport.send(SOURCE_HEADER, &[kind.wire_id()]) {
                log::warn!("Source selection not delivered: {e}");
            }
        }),
        EncoderRole::Passive => worker,
    }
}
