//! bolt_hardware: hardware and simulation backends behind `bolt_traits`.
//!
//! Features:
//! - `hardware`: enable Raspberry Pi GPIO/SPI-backed implementations.
//! - (default) no `hardware` feature: use simulation types that satisfy the
//!   traits, with a shared bench link so the simulated feedback pot tracks
//!   the simulated servo.
//!
//! Note: The `rppal` dependency is optional and only enabled when the
//!       `hardware` feature is active, so CI on x86 builds without GPIO libs.

pub mod error;
pub mod store;

#[cfg(not(feature = "hardware"))]
pub mod sim {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use bolt_traits::{AnalogInput, Servo, StatusPanel, Watchdog};

    use crate::error::HwError;

    // Feedback model: counts rise linearly with angle, with a fixed offset
    // between the driven and released regimes. The offset is the whole point
    // of the dual calibration tables.
    const COUNTS_PER_DEG: i32 = 4;
    const POWERED_BASE: i32 = 100;
    const RELEASED_BASE: i32 = 130;

    struct Bench {
        position_deg: i32,
        target_deg: Option<i32>,
        attached: bool,
        instant: bool,
    }

    /// Shared bench state linking a [`SimServo`] to its [`SimFeedback`].
    ///
    /// Tests hold a clone to script physics: nudge the bolt by hand with
    /// [`set_position`](SimLink::set_position), or crawl a lazy motor toward
    /// its target with [`step_motor`](SimLink::step_motor).
    #[derive(Clone)]
    pub struct SimLink {
        bench: Arc<Mutex<Bench>>,
        supply_asserts: Arc<AtomicU32>,
    }

    impl SimLink {
        /// Ideal servo: a written angle is reached instantly.
        pub fn new(initial_deg: i32) -> Self {
            Self::build(initial_deg, true)
        }

        /// Servo that only moves when [`step_motor`](SimLink::step_motor) is
        /// called, for exercising `BusyMove` and timeout paths.
        pub fn sluggish(initial_deg: i32) -> Self {
            Self::build(initial_deg, false)
        }

        fn build(initial_deg: i32, instant: bool) -> Self {
            Self {
                bench: Arc::new(Mutex::new(Bench {
                    position_deg: initial_deg,
                    target_deg: None,
                    attached: false,
                    instant,
                })),
                supply_asserts: Arc::new(AtomicU32::new(0)),
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Bench> {
            match self.bench.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            }
        }

        pub fn position(&self) -> i32 {
            self.lock().position_deg
        }

        /// Move the bolt by hand, e.g. to simulate manual interference.
        pub fn set_position(&self, deg: i32) {
            self.lock().position_deg = deg;
        }

        /// Advance the motor toward its target by at most `max_step` degrees.
        /// Does nothing while the servo is unpowered.
        pub fn step_motor(&self, max_step: i32) {
            let mut bench = self.lock();
            if !bench.attached {
                return;
            }
            if let Some(target) = bench.target_deg {
                let delta = (target - bench.position_deg).clamp(-max_step, max_step);
                bench.position_deg += delta;
            }
        }

        pub fn is_attached(&self) -> bool {
            self.lock().attached
        }

        /// How many times the switched supply line has been asserted.
        pub fn supply_asserts(&self) -> u32 {
            self.supply_asserts.load(Ordering::Relaxed)
        }

        pub fn servo(&self) -> SimServo {
            SimServo { link: self.clone() }
        }

        pub fn feedback(&self) -> SimFeedback {
            SimFeedback { link: self.clone() }
        }
    }

    pub struct SimServo {
        link: SimLink,
    }

    impl Servo for SimServo {
        fn attach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let mut bench = self.link.lock();
            bench.attached = true;
            self.link.supply_asserts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn detach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.link.lock().attached = false;
            Ok(())
        }

        fn write(&mut self, deg: i32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let mut bench = self.link.lock();
            if !bench.attached {
                return Err(Box::new(HwError::Detached));
            }
            bench.target_deg = Some(deg);
            if bench.instant {
                bench.position_deg = deg;
            }
            Ok(())
        }
    }

    pub struct SimFeedback {
        link: SimLink,
    }

    impl AnalogInput for SimFeedback {
        fn read_raw(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
            let bench = self.link.lock();
            let base = if bench.attached {
                POWERED_BASE
            } else {
                RELEASED_BASE
            };
            Ok(base + COUNTS_PER_DEG * bench.position_deg)
        }
    }

    /// Panel that remembers the last glyph it was asked to draw.
    #[derive(Clone, Default)]
    pub struct SimPanel {
        last: Arc<Mutex<Option<[u8; 8]>>>,
    }

    impl SimPanel {
        pub fn last_glyph(&self) -> Option<[u8; 8]> {
            self.last.lock().ok().and_then(|g| *g)
        }
    }

    impl StatusPanel for SimPanel {
        fn draw(&mut self, glyph: &[u8; 8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if let Ok(mut last) = self.last.lock() {
                *last = Some(*glyph);
            }
            Ok(())
        }
    }

    /// Watchdog that just counts; the simulated platform never bites.
    #[derive(Default)]
    pub struct SimWatchdog {
        pub feeds: u64,
    }

    impl Watchdog for SimWatchdog {
        fn feed(&mut self) {
            self.feeds += 1;
        }
    }
}

#[cfg(feature = "hardware")]
mod mcp3008;

#[cfg(feature = "hardware")]
pub mod hardware {
    use std::fs::{File, OpenOptions};
    use std::io::Write as _;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use bolt_traits::{AnalogInput, Servo, StatusPanel, Watchdog};
    use rppal::gpio::{Gpio, Level, OutputPin};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use tracing::{info, warn};

    use crate::mcp3008::Mcp3008;

    const SERVO_PERIOD: Duration = Duration::from_millis(20);
    const PULSE_MIN_US: u64 = 500;
    const PULSE_MAX_US: u64 = 2500;

    /// Hobby servo on a software-PWM GPIO pin with a BJT-switched supply.
    pub struct PiServo {
        pwm: OutputPin,
        supply: OutputPin,
        last_deg: i32,
    }

    impl PiServo {
        pub fn try_new(pwm_pin: u8, supply_pin: u8) -> Result<Self> {
            let gpio = Gpio::new().context("open GPIO for servo")?;
            let pwm = gpio
                .get(pwm_pin)
                .context("get servo PWM pin")?
                .into_output_low();
            let supply = gpio
                .get(supply_pin)
                .context("get servo supply pin")?
                .into_output_low();
            Ok(Self {
                pwm,
                supply,
                last_deg: 90,
            })
        }

        fn pulse_for(deg: i32) -> Duration {
            let deg = deg.clamp(0, 180) as u64;
            let span = PULSE_MAX_US - PULSE_MIN_US;
            Duration::from_micros(PULSE_MIN_US + span * deg / 180)
        }
    }

    impl Servo for PiServo {
        fn attach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.supply.set_high();
            self.pwm
                .set_pwm(SERVO_PERIOD, Self::pulse_for(self.last_deg))
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            info!("servo attached");
            Ok(())
        }

        fn detach(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.pwm
                .clear_pwm()
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            self.supply.set_low();
            info!("servo detached");
            Ok(())
        }

        fn write(&mut self, deg: i32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.last_deg = deg;
            self.pwm
                .set_pwm(SERVO_PERIOD, Self::pulse_for(deg))
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
        }
    }

    /// Feedback pot sampled through an MCP3008 on SPI0.
    pub struct PiFeedback {
        adc: Mcp3008,
        channel: u8,
    }

    impl PiFeedback {
        pub fn try_new(channel: u8) -> Result<Self> {
            let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)
                .context("open SPI for MCP3008")?;
            Ok(Self {
                adc: Mcp3008::new(spi),
                channel,
            })
        }
    }

    impl AnalogInput for PiFeedback {
        fn read_raw(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
            self.adc
                .read_channel(self.channel)
                .map(i32::from)
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
        }
    }

    /// Calibration button: edge watcher thread that latches a shared flag.
    /// The main loop clears the flag; this side only ever sets it.
    pub fn spawn_button_watcher(
        pin: u8,
        active_low: bool,
        poll_ms: u64,
        flag: Arc<AtomicBool>,
    ) -> Result<()> {
        let gpio = Gpio::new().context("open GPIO for button")?;
        let button = gpio.get(pin).context("get button pin")?.into_input_pullup();
        thread::spawn(move || {
            let mut prev_active = false;
            loop {
                let level_low = button.read() == Level::Low;
                let active = if active_low { level_low } else { !level_low };
                if active && !prev_active {
                    flag.store(true, Ordering::SeqCst);
                }
                prev_active = active;
                thread::sleep(Duration::from_millis(poll_ms.max(1)));
            }
        });
        Ok(())
    }

    /// MAX7219 8x8 matrix on SPI1 as the status panel.
    pub struct MatrixPanel {
        spi: Spi,
    }

    impl MatrixPanel {
        pub fn try_new() -> Result<Self> {
            let spi = Spi::new(Bus::Spi1, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)
                .context("open SPI for MAX7219")?;
            let mut panel = Self { spi };
            // decode off, scan all digits, medium intensity, leave shutdown
            for (reg, value) in [(0x09, 0x00), (0x0b, 0x07), (0x0a, 0x04), (0x0c, 0x01)] {
                panel.write_reg(reg, value).context("init MAX7219")?;
            }
            Ok(panel)
        }

        fn write_reg(&mut self, reg: u8, value: u8) -> rppal::spi::Result<()> {
            self.spi.write(&[reg, value]).map(|_| ())
        }
    }

    impl StatusPanel for MatrixPanel {
        fn draw(&mut self, glyph: &[u8; 8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            for (row, bits) in glyph.iter().enumerate() {
                self.write_reg(row as u8 + 1, *bits)
                    .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            }
            Ok(())
        }
    }

    /// Kernel watchdog device. Each feed writes one byte; if the loop stalls
    /// the kernel resets the board.
    pub struct PiWatchdog {
        dev: File,
    }

    impl PiWatchdog {
        pub fn try_new(path: &str) -> Result<Self> {
            let dev = OpenOptions::new()
                .write(true)
                .open(path)
                .with_context(|| format!("open watchdog device {path}"))?;
            Ok(Self { dev })
        }
    }

    impl Watchdog for PiWatchdog {
        fn feed(&mut self) {
            if let Err(e) = self.dev.write_all(b".") {
                warn!(error = %e, "watchdog feed failed");
            }
        }
    }
}

// Re-exports for callers (CLI/tests) to pick the right backend easily.
#[cfg(not(feature = "hardware"))]
pub use sim::{SimFeedback, SimLink, SimPanel, SimServo, SimWatchdog};

#[cfg(feature = "hardware")]
pub use hardware::{spawn_button_watcher, MatrixPanel, PiFeedback, PiServo, PiWatchdog};

pub use store::FileNonceStore;
