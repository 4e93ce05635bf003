//! Text formatting for display fields.
//!
//! Media sources hand us loosely formatted strings (HTML-escaped tags from
//! some streams, raw `rate:bits:channels` audio descriptors, seconds as
//! floats).  These helpers normalise them into what the display prints.

/// Unescape HTML entities and trim surrounding whitespace.
///
/// Covers the full HTML5 named set, numeric references, and the legacy
/// names browsers accept without a trailing semicolon.
pub fn clean_text(text: &str) -> String {
    htmlize::unescape(text).trim().to_string()
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `seconds` → `MM:SS`, or `HH:MM:SS` once past the hour.
///
/// Anything that does not parse as a number formats as `00:00`.
pub fn format_time(seconds: &str) -> String {
    match seconds.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() => format_duration_secs(secs.max(0.0) as u64),
        _ => "00:00".to_string(),
    }
}

pub fn format_duration_secs(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// MPD `audio` descriptor (`44100:16:2`) → `44.1kHz/16bit`.
///
/// Empty input is `No Format`; anything malformed passes through unchanged.
pub fn format_audio_info(audio: &str) -> String {
    if audio.is_empty() {
        return "No Format".to_string();
    }
    let parts: Vec<&str> = audio.split(':').collect();
    if let [rate, bits, _channels] = parts.as_slice()
        && let Ok(rate) = rate.parse::<f64>()
    {
        return format!("{}kHz/{}bit", format_float(rate / 1000.0), bits);
    }
    audio.to_string()
}

pub fn format_bitrate(kbps: &str) -> String {
    format!("{kbps} kbps")
}

/// Render a float the way the display firmware expects: integral values keep
/// a trailing `.0`, everything else uses the shortest representation.
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_unescapes_and_trims() {
        assert_eq!(clean_text("  Simon &amp; Garfunkel "), "Simon & Garfunkel");
        assert_eq!(clean_text("&lt;b&gt;&#39;&#x41;"), "<b>'A");
        assert_eq!(clean_text("R&B"), "R&B");
        assert_eq!(clean_text("&bogus; stays"), "&bogus; stays");
    }

    #[test]
    fn test_clean_text_named_and_legacy_entities() {
        assert_eq!(clean_text("AC&copy;DC"), "AC©DC");
        assert_eq!(clean_text("Tom &amp Jerry"), "Tom & Jerry");
        assert_eq!(clean_text("Caf&eacute"), "Café");
        assert_eq!(clean_text("Bj&ouml;rk &reg;"), "Björk ®");
        assert_eq!(clean_text("&frac12; Man"), "½ Man");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("éèà", 2), "éè");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time("0"), "00:00");
        assert_eq!(format_time("65.9"), "01:05");
        assert_eq!(format_time("3725"), "01:02:05");
        assert_eq!(format_time("garbage"), "00:00");
    }

    #[test]
    fn test_format_audio_info() {
        assert_eq!(format_audio_info("44100:16:2"), "44.1kHz/16bit");
        assert_eq!(format_audio_info("48000:24:2"), "48.0kHz/24bit");
        assert_eq!(format_audio_info(""), "No Format");
        assert_eq!(format_audio_info("dsd64:2"), "dsd64:2");
    }
}
