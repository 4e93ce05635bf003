//! Wire protocol spoken to the display microcontroller.
//!
//! Every message is one I2C block write: `[header, payload...]`.  Text
//! fields carry `[utf8_len, utf8_bytes...]`; control values are a single
//! byte; spectrum frames are one byte per bar.

use crate::error::DispatchError;
use crate::format::{clean_text, truncate_chars};

/// Single-byte message type identifier.
pub type Header = u8;

pub const SPECTRUM_HEADER: Header = 0x1A;
pub const SLEEP_MODE_HEADER: Header = 0x1C;
pub const ENCODER_1_HEADER: Header = 0x1D;
pub const ENCODER_2_HEADER: Header = 0x1E;
pub const SWITCH_1_HEADER: Header = 0x1F;
pub const SWITCH_2_HEADER: Header = 0x20;
pub const SOURCE_HEADER: Header = 0x32;

/// Media field name → header id, in transmission order.
const MEDIA_FIELDS: &[(&str, Header)] = &[
    ("title", 0x21),
    ("artist", 0x22),
    ("album", 0x23),
    ("track", 0x24),
    ("audio", 0x25),
    ("bitrate", 0x26),
    ("outrate", 0x27),
    ("state", 0x28),
    ("elapsed", 0x29),
    ("duration", 0x2A),
    ("volume", 0x2B),
    ("repeat", 0x2C),
    ("random", 0x2D),
    ("single", 0x2E),
    ("consume", 0x2F),
    ("playlist", 0x30),
    ("playlistlength", 0x31),
];

/// Ordered, immutable mapping from media field name to header.
#[derive(Debug, Clone)]
pub struct FieldMap {
    entries: Vec<(&'static str, Header)>,
}

impl FieldMap {
    pub fn media() -> Self {
        Self {
            entries: MEDIA_FIELDS.to_vec(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Header)> + '_ {
        self.entries.iter().copied()
    }

    #[cfg(test)]
    pub fn header(&self, field: &str) -> Option<Header> {
        self.entries
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, h)| *h)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Clean and truncate a raw field value into the text that goes on the wire.
pub fn format_field_text(raw: &str, max_length: usize) -> String {
    truncate_chars(&clean_text(raw), max_length).to_string()
}

/// Build the `[len, bytes...]` payload for a text field.
pub fn encode_text(header: Header, text: &str) -> Result<Vec<u8>, DispatchError> {
    let bytes = text.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| DispatchError::PayloadTooLong {
        header,
        len: bytes.len(),
    })?;
    let mut payload = Vec::with_capacity(bytes.len() + 1);
    payload.push(len);
    payload.extend_from_slice(bytes);
    Ok(payload)
}
