//! Quadrature and push-switch decoding.
//!
//! Pure state machines; no GPIO access.  The worker feeds them sampled pin
//! levels and kernel timestamps.

/// Sampled `(clk, dt)` level pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinState {
    pub clk: bool,
    pub dt: bool,
}

impl PinState {
    pub const fn new(clk: bool, dt: bool) -> Self {
        Self { clk, dt }
    }

    /// Position in the forward Gray sequence `11 → 01 → 00 → 10`.
    fn gray_index(self) -> u8 {
        match (self.clk, self.dt) {
            (true, true) => 0,
            (false, true) => 1,
            (false, false) => 2,
            (true, false) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Clockwise => "CW",
            Direction::CounterClockwise => "CCW",
        }
    }
}

/// One completed detent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detent {
    pub direction: Direction,
    /// Logical knob position after the move, in `[0, positions)`.
    pub value: u8,
}

/// Classify a transition between two Gray-code states.
fn classify(from: PinState, to: PinState) -> Option<Direction> {
    match (to.gray_index() + 4 - from.gray_index()) % 4 {
        1 => Some(Direction::Clockwise),
        3 => Some(Direction::CounterClockwise),
        // 0: no change, 2: skipped a state (bounce or missed edge)
        _ => None,
    }
}

/// Rotary encoder decoder.
///
/// Sub-steps accumulate in a signed counter; a detent registers once the
/// counter reaches `±steps_per_detent`, then the counter resets.  A bounce
/// back and forth between two adjacent states therefore cancels out.
#[derive(Debug)]
pub struct QuadratureDecoder {
    stable: PinState,
    substep: i8,
    steps_per_detent: i8,
    value: u8,
    positions: u8,
}

impl QuadratureDecoder {
    pub fn new(initial: PinState, steps_per_detent: u8, positions: u8) -> Self {
        Self {
            stable: initial,
            substep: 0,
            steps_per_detent: steps_per_detent.clamp(1, 64) as i8,
            value: 0,
            positions: positions.max(1),
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn substep(&self) -> i8 {
        self.substep
    }

    /// Feed a freshly sampled state.
    pub fn update(&mut self, state: PinState) -> Option<Detent> {
        if state == self.stable {
            return None;
        }
        let step = classify(self.stable, state);
        // Illegal jumps resynchronise without counting.
        self.stable = state;

        match step? {
            Direction::Clockwise => {
                self.substep += 1;
                if self.substep < self.steps_per_detent {
                    return None;
                }
                self.value = (self.value + 1) % self.positions;
                self.substep = 0;
                Some(Detent {
                    direction: Direction::Clockwise,
                    value: self.value,
                })
            }
            Direction::CounterClockwise => {
                self.substep -= 1;
                if self.substep > -self.steps_per_detent {
                    return None;
                }
                self.value = self.value.checked_sub(1).unwrap_or(self.positions - 1);
                self.substep = 0;
                Some(Detent {
                    direction: Direction::CounterClockwise,
                    value: self.value,
                })
            }
        }
    }
}

/// Active-low push switch with a lockout window after each accepted edge.
///
/// Edges inside the window are dropped.  An edge after the window whose
/// level matches the current state means the opposite transition was lost
/// in the window, so both are reported.
#[derive(Debug)]
pub struct SwitchDebouncer {
    pressed: bool,
    last_accepted_ns: Option<u64>,
    window_ns: u64,
}

impl SwitchDebouncer {
    pub fn new(initial_level_high: bool, window_ms: u64) -> Self {
        Self {
            pressed: !initial_level_high,
            last_accepted_ns: None,
            window_ns: window_ms * 1_000_000,
        }
    }

    /// Pressed states to report for this edge, oldest first.
    pub fn update(&mut self, level_high: bool, timestamp_ns: u64) -> &'static [bool] {
        if let Some(last) = self.last_accepted_ns
            && timestamp_ns.saturating_sub(last) < self.window_ns
        {
            return &[];
        }
        self.last_accepted_ns = Some(timestamp_ns);
        let pressed = !level_high;
        match (self.pressed, pressed) {
            (false, true) => {
                self.pressed = true;
                &[true]
            }
            (true, false) => {
                self.pressed = false;
                &[false]
            }
            (true, true) => &[false, true],
            (false, false) => &[true, false],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotaryLine {
    Clk,
    Dt,
}

/// Minimum spacing between accepted edges, tracked per line.
#[derive(Debug)]
pub struct EdgeFilter {
    last_ns: [Option<u64>; 2],
    window_ns: u64,
}

impl EdgeFilter {
    pub fn new(window_ms: u64) -> Self {
        Self {
            last_ns: [None; 2],
            window_ns: window_ms * 1_000_000,
        }
    }

    pub fn accept(&mut self, line: RotaryLine, timestamp_ns: u64) -> bool {
        let last = &mut self.last_ns[line as usize];
        if let Some(prev) = *last
            && timestamp_ns.saturating_sub(prev) < self.window_ns
        {
            return false;
        }
        *last = Some(timestamp_ns);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S11: PinState = PinState::new(true, true);
    const S01: PinState = PinState::new(false, true);
    const S00: PinState = PinState::new(false, false);
    const S10: PinState = PinState::new(true, false);

    fn feed(decoder: &mut QuadratureDecoder, states: &[PinState]) -> Vec<Detent> {
        states.iter().filter_map(|s| decoder.update(*s)).collect()
    }

    #[test]
    fn test_full_gray_cycle_is_one_clockwise_detent() {
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        let events = feed(&mut d, &[S01, S00, S10, S11]);
        assert_eq!(
            events,
            vec![Detent {
                direction: Direction::Clockwise,
                value: 1
            }]
        );
        assert_eq!(d.substep(), 0);
    }

    #[test]
    fn test_reverse_cycle_is_counter_clockwise_and_wraps() {
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        let events = feed(&mut d, &[S10, S00, S01, S11]);
        assert_eq!(
            events,
            vec![Detent {
                direction: Direction::CounterClockwise,
                value: 4
            }]
        );
    }

    #[test]
    fn test_value_wraps_after_five_detents() {
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        let cycle = [S01, S00, S10, S11];
        for _ in 0..5 {
            feed(&mut d, &cycle);
        }
        assert_eq!(d.value(), 0);
    }

    #[test]
    fn test_repeated_state_is_ignored() {
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        let events = feed(&mut d, &[S11, S01, S01, S01, S00, S00, S10, S11, S11]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_illegal_transitions_emit_nothing() {
        // Diagonal jumps only
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        assert!(feed(&mut d, &[S00, S11, S00, S11]).is_empty());
        assert_eq!(d.substep(), 0);

        let mut d = QuadratureDecoder::new(S01, 4, 5);
        assert!(feed(&mut d, &[S10, S01, S10, S01]).is_empty());
        assert_eq!(d.substep(), 0);
        assert_eq!(d.value(), 0);
    }

    #[test]
    fn test_counter_clockwise_wrap_with_wide_range() {
        let mut d = QuadratureDecoder::new(S11, 4, 200);
        let cw = [S01, S00, S10, S11];
        for _ in 0..150 {
            feed(&mut d, &cw);
        }
        assert_eq!(d.value(), 150);
        let events = feed(&mut d, &[S10, S00, S01, S11]);
        assert_eq!(events[0].value, 149);

        let mut d = QuadratureDecoder::new(S11, 4, 255);
        feed(&mut d, &[S10, S00, S01, S11]);
        assert_eq!(d.value(), 254);
    }

    #[test]
    fn test_bounce_between_adjacent_states_cancels() {
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        let events = feed(&mut d, &[S01, S11, S01, S11, S01, S11]);
        assert!(events.is_empty());
        assert_eq!(d.substep(), 0);
    }

    #[test]
    fn test_one_event_per_four_substeps() {
        let mut d = QuadratureDecoder::new(S11, 4, 5);
        let seq: Vec<PinState> = [S01, S00, S10, S11].iter().copied().cycle().take(4 * 7).collect();
        let events = feed(&mut d, &seq);
        assert_eq!(events.len(), 7);
        assert!(events.iter().all(|e| e.direction == Direction::Clockwise));
    }

    #[test]
    fn test_switch_is_active_low_with_lockout() {
        let mut sw = SwitchDebouncer::new(true, 300);
        assert_eq!(sw.update(false, 1_000_000_000), &[true]);
        // Bounce inside the window
        assert!(sw.update(true, 1_050_000_000).is_empty());
        assert!(sw.update(false, 1_100_000_000).is_empty());
        // Released after the window
        assert_eq!(sw.update(true, 1_400_000_000), &[false]);
    }

    #[test]
    fn test_short_taps_are_not_lost() {
        let mut sw = SwitchDebouncer::new(true, 300);
        let mut seen = Vec::new();
        for tap in 0..3u64 {
            let down = 1_000_000_000 + tap * 1_000_000_000;
            seen.extend_from_slice(sw.update(false, down));
            // Release lands inside the lockout
            seen.extend_from_slice(sw.update(true, down + 150_000_000));
        }
        assert_eq!(seen, vec![true, false, true, false, true]);
    }

    #[test]
    fn test_missed_press_is_reported_before_release() {
        let mut sw = SwitchDebouncer::new(true, 300);
        assert_eq!(sw.update(false, 1_000_000_000), &[true]);
        assert_eq!(sw.update(true, 1_500_000_000), &[false]);
        // Press lost to an earlier lockout; only the release edge arrives
        assert_eq!(sw.update(true, 2_500_000_000), &[true, false]);
    }

    #[test]
    fn test_edge_filter_is_per_line() {
        let mut f = EdgeFilter::new(1);
        assert!(f.accept(RotaryLine::Clk, 10_000_000));
        assert!(f.accept(RotaryLine::Dt, 10_500_000));
        assert!(!f.accept(RotaryLine::Clk, 10_600_000));
        assert!(f.accept(RotaryLine::Clk, 11_000_000));
        assert!(!f.accept(RotaryLine::Dt, 11_000_000));
    }
}
