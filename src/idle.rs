//! Sleep/idle policy.
//!
//! The display sleeps unless at least one media source reports an active
//! play state.  The combined flag is recomputed every tick but only
//! transmitted when it flips.

/// States that count as "playing".
const PLAY_STATES: &[&str] = &["play", "playing"];

/// Idle (`true`) unless any source is playing.  Sources with no known state
/// count as not playing.
pub fn is_idle<'a>(states: impl IntoIterator<Item = Option<&'a str>>) -> bool {
    !states.into_iter().flatten().any(|s| {
        let s = s.trim();
        PLAY_STATES.iter().any(|p| s.eq_ignore_ascii_case(p))
    })
}

/// Edge detector over [`is_idle`].
#[derive(Debug)]
pub struct SleepMonitor {
    sleeping: bool,
}

impl SleepMonitor {
    /// Starts out awake, matching the display's power-on state.
    pub fn new() -> Self {
        Self { sleeping: false }
    }

    /// Feed the latest states; returns the byte to transmit if the combined
    /// value changed.
    pub fn update<'a>(&mut self, states: impl IntoIterator<Item = Option<&'a str>>) -> Option<u8> {
        let idle = is_idle(states);
        if idle == self.sleeping {
            return None;
        }
        self.sleeping = idle;
        Some(u8::from(idle))
    }

    /// Undo the last transition after a failed send, so it is retried.
    pub fn revert(&mut self) {
        self.sleeping = !self.sleeping;
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_playing_source_keeps_awake() {
        assert!(!is_idle([Some("stop"), Some("play")]));
        assert!(!is_idle([Some("Playing"), None]));
        assert!(is_idle([Some("stop"), Some("stop")]));
        assert!(is_idle([Some("pause"), None]));
        assert!(is_idle([None, None]));
    }

    #[test]
    fn test_transmits_only_on_flip() {
        let mut monitor = SleepMonitor::new();
        assert_eq!(monitor.update([Some("stop"), Some("play")]), None);
        assert_eq!(monitor.update([Some("stop"), Some("stop")]), Some(1));
        assert_eq!(monitor.update([Some("stop"), Some("stop")]), None);
        assert_eq!(monitor.update([Some("pause"), Some("stop")]), None);
        assert_eq!(monitor.update([Some("play"), Some("stop")]), Some(0));
        assert_eq!(monitor.update([Some("play"), Some("play")]), None);
    }

    #[test]
    fn test_revert_retries_transition() {
        let mut monitor = SleepMonitor::new();
        assert_eq!(monitor.update([None]), Some(1));
        monitor.revert();
        assert!(!monitor.is_sleeping());
        assert_eq!(monitor.update([None]), Some(1));
    }
}
