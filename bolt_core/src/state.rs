//! Lock state and command sum types shared across the control plane.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Authoritative state of the deadbolt, owned by the control loop.
///
/// Boot starts in `CalibrateLock`; both calibration states are left through
/// the calibration button. `Bad` is absorbing for the lifetime of a power-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    CalibrateLock,
    CalibrateUnlock,
    Unlocked,
    Locked,
    BusyWait,
    BusyMove,
    Bad,
}

impl LockState {
    /// Wire name used on the HTTP status surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::CalibrateLock => "CALIBRATE_LOCK",
            LockState::CalibrateUnlock => "CALIBRATE_UNLOCK",
            LockState::Unlocked => "UNLOCK",
            LockState::Locked => "LOCK",
            LockState::BusyWait => "BUSY_WAIT",
            LockState::BusyMove => "BUSY_MOVE",
            LockState::Bad => "BAD",
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown lock state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for LockState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CALIBRATE_LOCK" => Ok(LockState::CalibrateLock),
            "CALIBRATE_UNLOCK" => Ok(LockState::CalibrateUnlock),
            "UNLOCK" => Ok(LockState::Unlocked),
            "LOCK" => Ok(LockState::Locked),
            "BUSY_WAIT" => Ok(LockState::BusyWait),
            "BUSY_MOVE" => Ok(LockState::BusyMove),
            "BAD" => Ok(LockState::Bad),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Authenticated motion command derived from the current tick's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Lock,
    Unlock,
}
