//! Idempotent wrapper around the raw servo seam.
//!
//! The wrapper owns the attached flag so that `attach`/`detach` are safe to
//! call from any state, and refuses angle writes while power is cut. It makes
//! no promise that the horn has reached a written angle on return; the FSM
//! observes progress through the position sensor.

use bolt_traits::Servo;
use eyre::WrapErr;

use crate::error::{LockError, Report, Result};

pub struct Actuator<M> {
    servo: M,
    attached: bool,
}

impl<M: Servo> Actuator<M> {
    pub fn new(servo: M) -> Self {
        Self {
            servo,
            attached: false,
        }
    }

    /// Energise the switched supply and bind the pulse generator.
    /// No-op when already attached.
    pub fn attach(&mut self) -> Result<()> {
        if self.attached {
            return Ok(());
        }
        self.servo
            .attach()
            .map_err(|e| Report::new(LockError::Hardware(e.to_string())))
            .wrap_err("servo attach")?;
        self.attached = true;
        Ok(())
    }

    /// Cut the supply. No-op when already detached.
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.servo
            .detach()
            .map_err(|e| Report::new(LockError::Hardware(e.to_string())))
            .wrap_err("servo detach")?;
        self.attached = false;
        Ok(())
    }

    /// Command a target angle. The servo must be powered.
    pub fn write(&mut self, deg: i32) -> Result<()> {
        if !self.attached {
            return Err(Report::new(LockError::State(
                "angle write while detached".into(),
            )));
        }
        self.servo
            .write(deg)
            .map_err(|e| Report::new(LockError::Hardware(e.to_string())))
            .wrap_err("servo write")
    }

    pub fn attach_and_write(&mut self, deg: i32) -> Result<()> {
        self.attach()?;
        self.write(deg)
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn servo_mut(&mut self) -> &mut M {
        &mut self.servo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct SpyServo {
        attaches: u32,
        detaches: u32,
        writes: Vec<i32>,
    }

    impl Servo for SpyServo {
        fn attach(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.attaches += 1;
            Ok(())
        }
        fn detach(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.detaches += 1;
            Ok(())
        }
        fn write(&mut self, deg: i32) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.writes.push(deg);
            Ok(())
        }
    }

    #[test]
    fn attach_detach_attach_asserts_supply_exactly_twice() {
        let mut act = Actuator::new(SpyServo::default());
        act.attach().unwrap();
        act.detach().unwrap();
        act.attach().unwrap();
        assert!(act.is_attached());
        assert_eq!(act.servo_mut().attaches, 2);
        assert_eq!(act.servo_mut().detaches, 1);
    }

    #[test]
    fn repeated_attach_is_idempotent() {
        let mut act = Actuator::new(SpyServo::default());
        act.attach().unwrap();
        act.attach().unwrap();
        act.attach().unwrap();
        assert_eq!(act.servo_mut().attaches, 1);
    }

    #[test]
    fn write_requires_power() {
        let mut act = Actuator::new(SpyServo::default());
        assert!(act.write(90).is_err());
        act.attach_and_write(90).unwrap();
        assert_eq!(act.servo_mut().writes, vec![90]);
    }
}
