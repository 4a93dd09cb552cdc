//! Local status mirror: one 8x8 glyph per lock state.
//!
//! The panel is a dumb external collaborator; its whole contract is "draw
//! this glyph". The mirror caches the last state it managed to draw and only
//! touches the panel on change, so a flaky panel is retried next tick and a
//! healthy one sees no redundant traffic.

use bolt_traits::StatusPanel;
use tracing::warn;

use crate::state::LockState;

const GLYPH_CALIBRATE_LOCK: [u8; 8] = [
    0b0011_1100,
    0b0110_0110,
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b0110_0110,
    0b0011_1100,
];

const GLYPH_CALIBRATE_UNLOCK: [u8; 8] = [
    0b0000_0000,
    0b0000_0000,
    0b0011_1100,
    0b0110_0110,
    0b1100_0000,
    0b1100_0000,
    0b0110_0110,
    0b0011_1100,
];

const GLYPH_UNLOCKED: [u8; 8] = [
    0b1100_0011,
    0b1100_0011,
    0b1100_0011,
    0b1100_0011,
    0b1100_0011,
    0b1100_0011,
    0b0110_0110,
    0b0011_1100,
];

const GLYPH_LOCKED: [u8; 8] = [
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b1100_0000,
    0b1111_1111,
];

// Hourglass: the bolt sits between endpoints under human control.
const GLYPH_BUSY_WAIT: [u8; 8] = [
    0b1111_1111,
    0b0100_0010,
    0b0010_0100,
    0b0001_1000,
    0b0001_1000,
    0b0010_0100,
    0b0100_0010,
    0b1111_1111,
];

// Opposed arrows: the motor is driving toward an endpoint.
const GLYPH_BUSY_MOVE: [u8; 8] = [
    0b0001_1000,
    0b0011_1100,
    0b0111_1110,
    0b0001_1000,
    0b0001_1000,
    0b0111_1110,
    0b0011_1100,
    0b0001_1000,
];

const GLYPH_BAD: [u8; 8] = [
    0b1100_0011,
    0b0110_0110,
    0b0011_1100,
    0b0001_1000,
    0b0001_1000,
    0b0011_1100,
    0b0110_0110,
    0b1100_0011,
];

pub fn glyph_for(state: LockState) -> &'static [u8; 8] {
    match state {
        LockState::CalibrateLock => &GLYPH_CALIBRATE_LOCK,
        LockState::CalibrateUnlock => &GLYPH_CALIBRATE_UNLOCK,
        LockState::Unlocked => &GLYPH_UNLOCKED,
        LockState::Locked => &GLYPH_LOCKED,
        LockState::BusyWait => &GLYPH_BUSY_WAIT,
        LockState::BusyMove => &GLYPH_BUSY_MOVE,
        LockState::Bad => &GLYPH_BAD,
    }
}

pub struct DisplayMirror {
    panel: Box<dyn StatusPanel>,
    last_drawn: Option<LockState>,
}

impl DisplayMirror {
    pub fn new(panel: Box<dyn StatusPanel>) -> Self {
        Self {
            panel,
            last_drawn: None,
        }
    }

    /// Push the glyph for `state` if it differs from the last drawn one.
    /// Panel failures are logged and retried on the next change of input.
    pub fn update(&mut self, state: LockState) {
        if self.last_drawn == Some(state) {
            return;
        }
        match self.panel.draw(glyph_for(state)) {
            Ok(()) => self.last_drawn = Some(state),
            Err(e) => warn!(error = %e, state = %state, "status panel draw failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const ALL: [LockState; 7] = [
        LockState::CalibrateLock,
        LockState::CalibrateUnlock,
        LockState::Unlocked,
        LockState::Locked,
        LockState::BusyWait,
        LockState::BusyMove,
        LockState::Bad,
    ];

    #[test]
    fn every_state_gets_a_distinct_glyph() {
        for (i, a) in ALL.iter().enumerate() {
            for b in &ALL[i + 1..] {
                assert_ne!(glyph_for(*a), glyph_for(*b), "{a} vs {b}");
            }
        }
    }

    struct CountingPanel(Arc<AtomicU32>);

    impl StatusPanel for CountingPanel {
        fn draw(
            &mut self,
            _glyph: &[u8; 8],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn mirror_draws_only_on_change() {
        let draws = Arc::new(AtomicU32::new(0));
        let mut mirror = DisplayMirror::new(Box::new(CountingPanel(draws.clone())));
        mirror.update(LockState::Unlocked);
        mirror.update(LockState::Unlocked);
        mirror.update(LockState::Unlocked);
        assert_eq!(draws.load(Ordering::Relaxed), 1);
        mirror.update(LockState::BusyMove);
        assert_eq!(draws.load(Ordering::Relaxed), 2);
    }
}
