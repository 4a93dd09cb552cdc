use std::thread;
use std::time::{Duration, Instant};

/// Position-feedback servo behind a switched supply line.
///
/// `attach` energises the supply and binds the pulse generator; `detach`
/// reverses both. Implementations make no promise that the horn has reached a
/// written angle on return; progress is observed through `AnalogInput`.
pub trait Servo {
    fn attach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn detach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn write(&mut self, deg: i32) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Raw analog source for the servo feedback potentiometer.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>>;
}

/// Single persistent slot holding the last-accepted authentication nonce.
///
/// `load` returns 0 when the slot has never been written. The stored value
/// must survive process restarts and power cycles.
pub trait NonceStore {
    fn load(&mut self) -> Result<u32, Box<dyn std::error::Error + Send + Sync>>;
    fn store(&mut self, nonce: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Dot-matrix status panel. One 8x8 glyph, row-major, MSB left.
pub trait StatusPanel {
    fn draw(&mut self, glyph: &[u8; 8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Hardware watchdog. The control loop feeds it once per tick; a starved
/// watchdog resets the processor, which is the recovery path for a hung loop.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Time source for every timeout and settle delay in the stack.
///
/// Keeping the clock behind a trait is what makes the move timeout, the
/// calibration settles, and the tick pacing deterministic under test: a test
/// clock advances its own offset instead of blocking.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Whole milliseconds between `epoch` and now; 0 if `epoch` is in the
    /// future.
    fn ms_since(&self, epoch: Instant) -> u64 {
        self.now().saturating_duration_since(epoch).as_millis() as u64
    }
}

/// The real thing: `std::time::Instant` and a blocking sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}
