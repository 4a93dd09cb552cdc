//! Bringup calibration against the simulated bench: both anchor tables are
//! recovered and the wrong table shows the bias the split exists to remove.

use bolt_core::actuator::Actuator;
use bolt_core::mocks::ManualClock;
use bolt_core::sensor::{FeedbackTable, PositionSensor};
use bolt_hardware::sim::SimLink;
use std::time::Duration;

#[test]
fn calibration_records_both_anchor_tables() {
    let link = SimLink::new(90);
    let mut motor = Actuator::new(link.servo());
    let mut sensor = PositionSensor::new(link.feedback());
    let clock = ManualClock::new();

    sensor
        .calibrate(
            &mut motor,
            &clock,
            0,
            180,
            Duration::from_millis(2000),
            Duration::from_millis(500),
        )
        .unwrap();

    // Matches the sim feedback model at the endpoints.
    assert_eq!(
        sensor.powered_table(),
        FeedbackTable {
            min_feedback: 100,
            max_feedback: 820
        }
    );
    assert_eq!(
        sensor.released_table(),
        FeedbackTable {
            min_feedback: 130,
            max_feedback: 850
        }
    );
    assert!(!motor.is_attached(), "calibration restores the idle state");
}

#[test]
fn wrong_table_introduces_systematic_bias() {
    let link = SimLink::new(90);
    let mut motor = Actuator::new(link.servo());
    let mut sensor = PositionSensor::new(link.feedback());
    let clock = ManualClock::new();
    sensor
        .calibrate(
            &mut motor,
            &clock,
            0,
            180,
            Duration::from_millis(2000),
            Duration::from_millis(500),
        )
        .unwrap();

    link.set_position(120);

    // Servo is unpowered; the released table lands on the true angle.
    assert_eq!(sensor.sample(false).unwrap(), 120);
    // Claiming it is powered picks the wrong anchors and skews the angle.
    let biased = sensor.sample(true).unwrap();
    assert!(
        (biased - 120).abs() >= 5,
        "expected several degrees of bias, got {biased}"
    );
}

#[test]
fn flat_feedback_fails_calibration() {
    struct FlatInput;
    impl bolt_traits::AnalogInput for FlatInput {
        fn read_raw(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
            Ok(512)
        }
    }

    let link = SimLink::new(0);
    let mut motor = Actuator::new(link.servo());
    let mut sensor = PositionSensor::new(FlatInput);
    let clock = ManualClock::new();

    let err = sensor
        .calibrate(
            &mut motor,
            &clock,
            0,
            180,
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
        .expect_err("anchors must differ");
    assert!(format!("{err}").contains("calibration"));
}
