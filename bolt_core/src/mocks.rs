//! Test and helper doubles for bolt_core.
//!
//! These live in the library (not behind `cfg(test)`) so integration tests
//! and the sim-backed CLI paths can share them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bolt_traits::{Clock, NonceStore, Servo, StatusPanel, Watchdog};

/// Deterministic clock whose time is advanced manually. `sleep` advances the
/// virtual time instead of blocking, so calibration settles and tick pacing
/// run instantly under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Shared in-memory nonce slot. Clones observe each other's writes, so a test
/// can keep a handle while the verifier owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryNonceStore(Arc<AtomicU32>);

impl MemoryNonceStore {
    pub fn with_value(value: u32) -> Self {
        Self(Arc::new(AtomicU32::new(value)))
    }

    pub fn value(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl NonceStore for MemoryNonceStore {
    fn load(&mut self) -> Result<u32, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.load(Ordering::SeqCst))
    }

    fn store(&mut self, nonce: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.store(nonce, Ordering::SeqCst);
        Ok(())
    }
}

/// Panel that accepts every glyph.
pub struct NullPanel;

impl StatusPanel for NullPanel {
    fn draw(&mut self, _glyph: &[u8; 8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Watchdog that counts its feedings.
#[derive(Debug, Clone, Default)]
pub struct CountingWatchdog(Arc<AtomicU32>);

impl CountingWatchdog {
    pub fn feeds(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Servo call recorded by [`RecordingServo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoCall {
    Attach,
    Detach,
    Write(i32),
}

/// Servo that records every call for transition-effect assertions.
#[derive(Debug, Default)]
pub struct RecordingServo {
    pub calls: Vec<ServoCall>,
}

impl Servo for RecordingServo {
    fn attach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.calls.push(ServoCall::Attach);
        Ok(())
    }

    fn detach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.calls.push(ServoCall::Detach);
        Ok(())
    }

    fn write(&mut self, deg: i32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.calls.push(ServoCall::Write(deg));
        Ok(())
    }
}
