//! Denoised angle sensing over the servo feedback potentiometer.
//!
//! The feedback pin is noisy and occasionally jumps to a ridiculous value, so
//! every sample takes five raw reads, drops the extremes, and averages the
//! middle three. The pot also drifts with drive state: the same shaft angle
//! reads differently depending on whether the motor is powered. Two anchor
//! tables are therefore kept, one recorded while driven and one after
//! release, and the caller states which regime the servo is in.

use std::time::Duration;

use bolt_traits::{AnalogInput, Clock, Servo};
use eyre::WrapErr;
use tracing::{debug, info};

use crate::actuator::Actuator;
use crate::error::{LockError, Report, Result};

/// Feedback counts observed at the two calibration endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackTable {
    pub min_feedback: i32,
    pub max_feedback: i32,
}

pub struct PositionSensor<A> {
    input: A,
    min_deg: i32,
    max_deg: i32,
    powered: FeedbackTable,
    released: FeedbackTable,
}

/// Arduino-style integer range map.
fn map_range(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    let span = (in_max - in_min) as i64;
    if span == 0 {
        return out_min;
    }
    let num = (x - in_min) as i64 * (out_max - out_min) as i64;
    (num / span + out_min as i64) as i32
}

impl<A: AnalogInput> PositionSensor<A> {
    /// Sensor with known anchors (restored calibration or simulation).
    pub fn with_tables(
        input: A,
        min_deg: i32,
        max_deg: i32,
        powered: FeedbackTable,
        released: FeedbackTable,
    ) -> Self {
        Self {
            input,
            min_deg,
            max_deg,
            powered,
            released,
        }
    }

    /// Uncalibrated sensor; call [`calibrate`](Self::calibrate) before
    /// sampling.
    pub fn new(input: A) -> Self {
        Self::with_tables(
            input,
            0,
            0,
            FeedbackTable {
                min_feedback: 0,
                max_feedback: 0,
            },
            FeedbackTable {
                min_feedback: 0,
                max_feedback: 0,
            },
        )
    }

    /// Five raw reads, extremes dropped, integer mean of the middle three.
    fn read_stable(&mut self) -> Result<i32> {
        let mut v = [0i32; 5];
        for slot in &mut v {
            *slot = self
                .input
                .read_raw()
                .map_err(|e| Report::new(LockError::Hardware(e.to_string())))
                .wrap_err("feedback read")?;
        }
        v.sort_unstable();
        Ok((v[1] + v[2] + v[3]) / 3)
    }

    /// Current shaft angle in degrees. `powered` selects the anchor table and
    /// must reflect the actual drive state or the result carries a systematic
    /// bias of several degrees.
    pub fn sample(&mut self, powered: bool) -> Result<i32> {
        let feedback = self.read_stable()?;
        let table = if powered { self.powered } else { self.released };
        let deg = map_range(
            feedback,
            table.min_feedback,
            table.max_feedback,
            self.min_deg,
            self.max_deg,
        );
        debug!(feedback, powered, deg, "position sample");
        Ok(deg)
    }

    /// Record feedback anchors at both travel endpoints, in both drive
    /// regimes. Drives the motor there, waits for mechanical settle, reads the
    /// powered anchor, cuts power, waits again, reads the released anchor.
    /// Restores the prior attach state on success.
    pub fn calibrate<M: Servo, C: Clock>(
        &mut self,
        motor: &mut Actuator<M>,
        clock: &C,
        min_pos: i32,
        max_pos: i32,
        settle_powered: Duration,
        settle_released: Duration,
    ) -> Result<()> {
        info!(min_pos, max_pos, "calibrating feedback anchors");
        let was_attached = motor.is_attached();

        motor.attach_and_write(min_pos)?;
        clock.sleep(settle_powered);
        let powered_min = self.read_stable()?;
        motor.detach()?;
        clock.sleep(settle_released);
        let released_min = self.read_stable()?;

        motor.attach_and_write(max_pos)?;
        clock.sleep(settle_powered);
        let powered_max = self.read_stable()?;
        motor.detach()?;
        clock.sleep(settle_released);
        let released_max = self.read_stable()?;

        if powered_min == powered_max || released_min == released_max {
            return Err(Report::new(LockError::Calibration(
                "feedback did not change between endpoints",
            )));
        }

        self.min_deg = min_pos;
        self.max_deg = max_pos;
        self.powered = FeedbackTable {
            min_feedback: powered_min,
            max_feedback: powered_max,
        };
        self.released = FeedbackTable {
            min_feedback: released_min,
            max_feedback: released_max,
        };

        if was_attached {
            motor.attach()?;
        }
        info!(
            powered_min,
            powered_max, released_min, released_max, "feedback anchors recorded"
        );
        Ok(())
    }

    pub fn powered_table(&self) -> FeedbackTable {
        self.powered
    }

    pub fn released_table(&self) -> FeedbackTable {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SeqInput {
        seq: Vec<i32>,
        idx: usize,
    }

    impl SeqInput {
        fn new(seq: impl Into<Vec<i32>>) -> Self {
            Self {
                seq: seq.into(),
                idx: 0,
            }
        }
    }

    impl AnalogInput for SeqInput {
        fn read_raw(&mut self) -> std::result::Result<i32, Box<dyn std::error::Error + Send + Sync>> {
            let v = if self.idx < self.seq.len() {
                let x = self.seq[self.idx];
                self.idx += 1;
                x
            } else {
                self.seq.last().copied().unwrap_or(0)
            };
            Ok(v)
        }
    }

    fn sensor(seq: Vec<i32>) -> PositionSensor<SeqInput> {
        PositionSensor::with_tables(
            SeqInput::new(seq),
            0,
            180,
            FeedbackTable {
                min_feedback: 100,
                max_feedback: 820,
            },
            FeedbackTable {
                min_feedback: 130,
                max_feedback: 850,
            },
        )
    }

    #[test]
    fn stable_read_drops_spikes() {
        // One absurd spike high and one low; the middle three agree.
        let mut s = sensor(vec![460, 9999, 460, 0, 460]);
        assert_eq!(s.read_stable().unwrap(), 460);
    }

    #[test]
    fn powered_and_released_tables_differ() {
        let raw = 460;
        let mut s = sensor(vec![raw; 10]);
        let powered = s.sample(true).unwrap();
        let released = s.sample(false).unwrap();
        assert_ne!(
            powered, released,
            "identical mapping would mask drive-state drift"
        );
        assert_eq!(powered, map_range(raw, 100, 820, 0, 180));
        assert_eq!(released, map_range(raw, 130, 850, 0, 180));
    }

    #[test]
    fn map_range_hits_endpoints() {
        assert_eq!(map_range(100, 100, 820, 0, 180), 0);
        assert_eq!(map_range(820, 100, 820, 0, 180), 180);
        assert_eq!(map_range(0, 0, 0, 50, 120), 50);
    }
}
