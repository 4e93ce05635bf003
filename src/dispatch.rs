//! Change-tracking field dispatcher.
//!
//! Decides which media fields actually need to go over the wire.  A field is
//! double-gated:
//!
//! 1. its raw value must differ from the previous snapshot of the same
//!    source, and
//! 2. its cleaned + truncated text must differ from what was last
//!    *transmitted* on that header (two raw values can format identically).
//!
//! The whole diff-then-send sequence runs under one lock, so two pollers can
//! never interleave sends for the same header out of order.  A field whose
//! send fails keeps its old "previous" value and is retried on the next poll.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::{MediaSnapshot, MediaValue, SourceKind};
use crate::protocol::{FieldMap, Header, encode_text, format_field_text};
use crate::transport::Transport;

/// Outcome counters for one dispatch call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Default)]
struct DispatchState {
    /// Header → last successfully transmitted text.  Never shrinks.
    last_sent: HashMap<Header, String>,
    /// Per source, field → raw value that has been fully handled.
    previous: HashMap<SourceKind, HashMap<&'static str, MediaValue>>,
}

pub struct Dispatcher {
    fields: FieldMap,
    max_length: usize,
    transport: Arc<dyn Transport>,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(fields: FieldMap, max_length: usize, transport: Arc<dyn Transport>) -> Self {
        Self {
            fields,
            max_length,
            transport,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Send every field of `snapshot` whose formatted value changed.
    pub fn dispatch(&self, source: SourceKind, snapshot: &MediaSnapshot) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut guard = self.state.lock();
        let DispatchState { last_sent, previous } = &mut *guard;
        let previous = previous.entry(source).or_default();

        for (field, header) in self.fields.iter() {
            let Some(value) = snapshot.get(field) else {
                continue;
            };
            if previous.get(field) == Some(value) {
                continue;
            }

            let text = format_field_text(&value.to_string(), self.max_length);
            if last_sent.get(&header) == Some(&text) {
                log::debug!("Skip I2C - header 0x{header:02X}, unchanged: {text}");
                previous.insert(field, value.clone());
                report.unchanged += 1;
                continue;
            }

            let payload = match encode_text(header, &text) {
                Ok(p) => p,
                Err(e) => {
                    log::error!("Error formatting field {field}: {e}");
                    previous.insert(field, value.clone());
                    report.failed += 1;
                    continue;
                }
            };

            match self.transport.send(header, &payload) {
                Ok(()) => {
                    log::info!(
                        "I2C update ({}) - header 0x{header:02X}, new: {text}, old: {}",
                        source.label(),
                        last_sent.get(&header).map(String::as_str).unwrap_or("None")
                    );
                    last_sent.insert(header, text);
                    previous.insert(field, value.clone());
                    report.sent += 1;
                }
                Err(e) => {
                    log::warn!("Field {field} not delivered, will retry next poll: {e}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Last transmitted text for `header`, if any.
    #[cfg(test)]
    pub fn last_sent(&self, header: Header) -> Option<String> {
        self.state.lock().last_sent.get(&header).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;

    fn dispatcher(max_length: usize) -> (Dispatcher, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let d = Dispatcher::new(FieldMap::media(), max_length, transport.clone());
        (d, transport)
    }

    #[test]
    fn test_scenario_send_only_changes() {
        let (d, t) = dispatcher(30);
        let first = MediaSnapshot::new().with("title", "A").with("state", "play");
        let second = first.clone();
        let third = MediaSnapshot::new().with("title", "B").with("state", "pause");

        d.dispatch(SourceKind::Mpd, &first);
        assert_eq!(
            t.texts(),
            vec![(0x21, "A".to_string()), (0x28, "play".to_string())]
        );

        d.dispatch(SourceKind::Mpd, &second);
        assert!(t.take().is_empty());

        d.dispatch(SourceKind::Mpd, &third);
        assert_eq!(
            t.texts(),
            vec![(0x21, "B".to_string()), (0x28, "pause".to_string())]
        );
    }

    #[test]
    fn test_replaying_snapshot_sends_once() {
        let (d, t) = dispatcher(30);
        let snap = MediaSnapshot::new()
            .with("title", "Song")
            .with("artist", "Band")
            .with("volume", 80);
        for _ in 0..10 {
            d.dispatch(SourceKind::Mpd, &snap);
        }
        assert_eq!(t.take().len(), 3);
    }

    #[test]
    fn test_fields_outside_the_map_are_ignored() {
        let (d, t) = dispatcher(30);
        let snap = MediaSnapshot::new().with("lyrics", "la la").with("album", "X");
        d.dispatch(SourceKind::Mpd, &snap);
        assert_eq!(t.texts(), vec![(0x23, "X".to_string())]);
    }

    #[test]
    fn test_truncation_collapses_distinct_values() {
        let (d, t) = dispatcher(5);
        d.dispatch(SourceKind::Mpd, &MediaSnapshot::new().with("title", "Hello World"));
        assert_eq!(t.texts(), vec![(0x21, "Hello".to_string())]);

        // Raw value differs but formats identically: nothing on the wire
        let report = d.dispatch(SourceKind::Mpd, &MediaSnapshot::new().with("title", "Hello There"));
        assert_eq!(report.unchanged, 1);
        assert!(t.take().is_empty());
    }

    #[test]
    fn test_cleaning_applies_before_comparison() {
        let (d, t) = dispatcher(30);
        d.dispatch(SourceKind::Mpd, &MediaSnapshot::new().with("artist", "Tom &amp; Jerry"));
        let sent = t.take();
        assert_eq!(sent[0].1[0] as usize, "Tom & Jerry".len());

        d.dispatch(SourceKind::Mpd, &MediaSnapshot::new().with("artist", " Tom & Jerry "));
        assert!(t.take().is_empty());
    }

    #[test]
    fn test_failed_send_is_retried_next_poll() {
        let (d, t) = dispatcher(30);
        let snap = MediaSnapshot::new().with("title", "A");
        t.fail_next(1);
        let report = d.dispatch(SourceKind::Mpd, &snap);
        assert_eq!(report.failed, 1);
        assert_eq!(d.last_sent(0x21), None);

        let report = d.dispatch(SourceKind::Mpd, &snap);
        assert_eq!(report.sent, 1);
        assert_eq!(t.texts(), vec![(0x21, "A".to_string())]);
        assert_eq!(d.last_sent(0x21).as_deref(), Some("A"));
    }

    #[test]
    fn test_sources_share_last_sent_values() {
        let (d, t) = dispatcher(30);
        d.dispatch(SourceKind::Mpd, &MediaSnapshot::new().with("state", "stop"));
        d.dispatch(SourceKind::Bluetooth, &MediaSnapshot::new().with("state", "stop"));
        assert_eq!(t.take().len(), 1);

        d.dispatch(SourceKind::Bluetooth, &MediaSnapshot::new().with("state", "play"));
        assert_eq!(t.texts(), vec![(0x28, "play".to_string())]);
    }

    #[test]
    fn test_numeric_values_are_sent_as_text() {
        let (d, t) = dispatcher(30);
        d.dispatch(SourceKind::Mpd, &MediaSnapshot::new().with("repeat", 1));
        let sent = t.take();
        assert_eq!(sent, vec![(0x2C, vec![1, b'1'])]);
    }

    #[test]
    fn test_unencodable_field_does_not_abort_cycle() {
        let transport = Arc::new(RecordingTransport::new());
        let d = Dispatcher::new(FieldMap::media(), 300, transport.clone());
        let snap = MediaSnapshot::new()
            .with("title", "z".repeat(280))
            .with("artist", "fine");
        let report = d.dispatch(SourceKind::Mpd, &snap);
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(transport.texts(), vec![(0x22, "fine".to_string())]);
    }
}
