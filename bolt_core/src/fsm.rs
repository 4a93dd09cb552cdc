//! Seven-state lock machine fusing position, wall clock, command, and the
//! calibration button into authoritative lock intent.
//!
//! One `step` per control-loop tick. Inputs are the denoised angle, the
//! monotonic millisecond clock, the consumed calibration-button flag, and the
//! command derived from this tick's authenticated request. Side effects are
//! confined to the actuator: power is applied on entering `BusyMove` and
//! released on every path out of it.

use bolt_traits::Servo;
use tracing::{debug, warn};

use crate::actuator::Actuator;
use crate::error::Result;
use crate::state::{Command, LockState};

/// Tolerances for the position predicates and the move watchdog.
#[derive(Debug, Clone, Copy)]
pub struct FsmConfig {
    /// Half-width of the "at endpoint" band, in degrees.
    pub angle_tolerance_deg: i32,
    /// A commanded move that has not reached its endpoint after this many
    /// milliseconds faults the machine.
    pub move_timeout_ms: u64,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            angle_tolerance_deg: 5,
            move_timeout_ms: 5000,
        }
    }
}

pub struct LockFsm {
    cfg: FsmConfig,
    state: LockState,
    lock_deg: i32,
    unlock_deg: i32,
    /// Wall-clock ms at which the current `BusyMove` began. Meaningless in
    /// any other state.
    move_started_ms: u64,
    /// Never `None` while in `BusyMove`.
    current_cmd: Option<Command>,
}

impl LockFsm {
    /// Fresh machine awaiting calibration.
    pub fn new(cfg: FsmConfig) -> Self {
        Self {
            cfg,
            state: LockState::CalibrateLock,
            lock_deg: 0,
            unlock_deg: 0,
            move_started_ms: 0,
            current_cmd: None,
        }
    }

    /// Rehydrate a machine at a known point. Used by tests and by bringup
    /// paths that skip interactive calibration.
    pub fn restore(
        cfg: FsmConfig,
        state: LockState,
        lock_deg: i32,
        unlock_deg: i32,
        move_started_ms: u64,
        current_cmd: Option<Command>,
    ) -> Self {
        Self {
            cfg,
            state,
            lock_deg,
            unlock_deg,
            move_started_ms,
            current_cmd,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn lock_deg(&self) -> i32 {
        self.lock_deg
    }

    pub fn unlock_deg(&self) -> i32 {
        self.unlock_deg
    }

    pub fn move_started_ms(&self) -> u64 {
        self.move_started_ms
    }

    pub fn current_cmd(&self) -> Option<Command> {
        self.current_cmd
    }

    fn at_unlock(&self, deg: i32) -> bool {
        deg <= self.unlock_deg + self.cfg.angle_tolerance_deg
    }

    fn at_lock(&self, deg: i32) -> bool {
        deg >= self.lock_deg - self.cfg.angle_tolerance_deg
    }

    /// Advance the machine by one tick.
    ///
    /// Commands arriving in `BusyWait`, `Bad`, or while already on the
    /// commanded side cause no transition; the HTTP layer reports those as
    /// 503 using the state returned here.
    pub fn step<M: Servo>(
        &mut self,
        deg: i32,
        now_ms: u64,
        calibrate_pressed: bool,
        cmd: Option<Command>,
        motor: &mut Actuator<M>,
    ) -> Result<LockState> {
        let from = self.state;

        match self.state {
            LockState::CalibrateLock => {
                if calibrate_pressed {
                    self.lock_deg = deg;
                    self.state = LockState::CalibrateUnlock;
                }
            }

            LockState::CalibrateUnlock => {
                if calibrate_pressed {
                    let tol = self.cfg.angle_tolerance_deg;
                    // Endpoint bands must not overlap or the position
                    // predicates become ambiguous.
                    if deg + tol < self.lock_deg - tol {
                        self.unlock_deg = deg;
                        self.state = LockState::Unlocked;
                    } else {
                        warn!(
                            deg,
                            lock_deg = self.lock_deg,
                            "calibration rejected: endpoints too close"
                        );
                    }
                }
            }

            LockState::Unlocked => {
                if self.at_unlock(deg) && cmd == Some(Command::Lock) {
                    self.move_started_ms = now_ms;
                    self.current_cmd = Some(Command::Lock);
                    motor.attach_and_write(self.lock_deg)?;
                    self.state = LockState::BusyMove;
                } else if self.at_lock(deg) {
                    motor.detach()?;
                    self.state = LockState::Locked;
                } else if !self.at_unlock(deg) {
                    self.state = LockState::BusyWait;
                }
            }

            LockState::Locked => {
                if self.at_lock(deg) && cmd == Some(Command::Unlock) {
                    self.move_started_ms = now_ms;
                    self.current_cmd = Some(Command::Unlock);
                    motor.attach_and_write(self.unlock_deg)?;
                    self.state = LockState::BusyMove;
                } else if self.at_unlock(deg) {
                    motor.detach()?;
                    self.state = LockState::Unlocked;
                } else if !self.at_lock(deg) {
                    self.state = LockState::BusyWait;
                }
            }

            LockState::BusyWait => {
                // Human-driven motion; no timeout. Settles when the bolt
                // reaches either endpoint.
                if self.at_unlock(deg) {
                    self.state = LockState::Unlocked;
                } else if self.at_lock(deg) {
                    self.state = LockState::Locked;
                }
            }

            LockState::BusyMove => {
                if now_ms.saturating_sub(self.move_started_ms) > self.cfg.move_timeout_ms {
                    motor.detach()?;
                    self.current_cmd = None;
                    self.state = LockState::Bad;
                } else {
                    // Completion is gated by the active command, not by the
                    // raw position predicates. The first reading of a move can
                    // still satisfy the opposite predicate inside the
                    // tolerance band.
                    match self.current_cmd {
                        Some(Command::Unlock) if self.at_unlock(deg) => {
                            motor.detach()?;
                            self.current_cmd = None;
                            self.state = LockState::Unlocked;
                        }
                        Some(Command::Lock) if self.at_lock(deg) => {
                            motor.detach()?;
                            self.current_cmd = None;
                            self.state = LockState::Locked;
                        }
                        _ => {}
                    }
                }
            }

            LockState::Bad => {
                // Absorbing. Keep the motor unpowered no matter what.
                motor.detach()?;
                self.current_cmd = None;
            }
        }

        if self.state != from {
            debug!(from = %from, to = %self.state, deg, "fsm transition");
        }
        Ok(self.state)
    }
}
