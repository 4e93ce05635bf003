use std::collections::HashMap;
use std::fmt;

use crate::error::AdapterError;
use crate::format::format_float;

/// Loosely typed value as reported by a media source.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for MediaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaValue::Text(s) => f.write_str(s),
            MediaValue::Int(n) => write!(f, "{n}"),
            MediaValue::Float(x) => f.write_str(&format_float(*x)),
        }
    }
}

impl From<&str> for MediaValue {
    fn from(s: &str) -> Self {
        MediaValue::Text(s.to_string())
    }
}

impl From<String> for MediaValue {
    fn from(s: String) -> Self {
        MediaValue::Text(s)
    }
}

impl From<i64> for MediaValue {
    fn from(n: i64) -> Self {
        MediaValue::Int(n)
    }
}

/// One full read of a player's state.  Replaced wholesale every poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSnapshot {
    fields: HashMap<String, MediaValue>,
}

impl MediaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<MediaValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<MediaValue>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&MediaValue> {
        self.fields.get(field)
    }

    /// Playback state (`play`, `pause`, `stop`, ...), lowercased.
    pub fn state(&self) -> Option<String> {
        self.get("state").map(|v| v.to_string().to_lowercase())
    }
}

/// Which adapter produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Mpd,
    Bluetooth,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Mpd => "MPD",
            SourceKind::Bluetooth => "Bluetooth",
        }
    }

    /// Value sent on the source-select header.
    pub fn wire_id(&self) -> u8 {
        match self {
            SourceKind::Mpd => 0,
            SourceKind::Bluetooth => 1,
        }
    }
}

/// Uniform polling and control interface over a media player.
///
/// Implementations use interior locking: the poller thread calls
/// `fetch_snapshot()` while encoder workers call the transport controls.
/// Controls are fire-and-forget and only log failures.
pub trait MediaSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn is_connected(&self) -> bool;

    fn connect(&self) -> Result<(), AdapterError>;

    /// `Ok(None)` means the source is reachable but has nothing to report.
    fn fetch_snapshot(&self) -> Result<Option<MediaSnapshot>, AdapterError>;

    /// Drop the connection so the next cycle reconnects.
    fn mark_disconnected(&self);

    fn next(&self);
    fn previous(&self);
    fn play(&self);
    fn pause(&self);
    fn toggle_play_pause(&self);
    fn set_volume(&self, volume: u8);

    fn cleanup(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(MediaValue::from("abc").to_string(), "abc");
        assert_eq!(MediaValue::Int(42).to_string(), "42");
        assert_eq!(MediaValue::Float(12.0).to_string(), "12.0");
        assert_eq!(MediaValue::Float(0.5).to_string(), "0.5");
    }

    #[test]
    fn test_state_is_lowercased() {
        let snap = MediaSnapshot::new().with("state", "PLAY");
        assert_eq!(snap.state().as_deref(), Some("play"));
        assert_eq!(MediaSnapshot::new().state(), None);
    }
}
