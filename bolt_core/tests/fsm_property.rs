//! Property coverage for the lock machine invariants under arbitrary input
//! streams: command hygiene, motor power discipline, and the absorbing fault
//! state.

use bolt_core::actuator::Actuator;
use bolt_core::fsm::{FsmConfig, LockFsm};
use bolt_core::mocks::RecordingServo;
use bolt_core::state::{Command, LockState};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
struct TickInput {
    deg: i32,
    dt_ms: u64,
    cmd: Option<Command>,
    button: bool,
}

fn tick_strategy() -> impl Strategy<Value = TickInput> {
    (
        -10i32..200,
        0u64..3000,
        prop_oneof![
            Just(None),
            Just(Some(Command::Lock)),
            Just(Some(Command::Unlock)),
        ],
        any::<bool>(),
    )
        .prop_map(|(deg, dt_ms, cmd, button)| TickInput {
            deg,
            dt_ms,
            cmd,
            button,
        })
}

proptest! {
    #[test]
    fn invariants_hold_for_any_input_stream(
        inputs in proptest::collection::vec(tick_strategy(), 1..200)
    ) {
        let mut fsm = LockFsm::restore(
            FsmConfig::default(),
            LockState::Unlocked,
            120,
            50,
            0,
            None,
        );
        let mut motor = Actuator::new(RecordingServo::default());
        let mut now_ms = 0u64;
        let mut seen_bad = false;

        for input in inputs {
            now_ms += input.dt_ms;
            let state = fsm
                .step(input.deg, now_ms, input.button, input.cmd, &mut motor)
                .unwrap();

            // A command only survives the tick inside BusyMove.
            if state != LockState::BusyMove {
                prop_assert_eq!(fsm.current_cmd(), None);
            } else {
                prop_assert!(fsm.current_cmd().is_some());
            }

            // Motor power is asserted exactly while a commanded move runs.
            prop_assert_eq!(motor.is_attached(), state == LockState::BusyMove);

            // Bad is absorbing for the rest of the power-on.
            if seen_bad {
                prop_assert_eq!(state, LockState::Bad);
            }
            seen_bad = seen_bad || state == LockState::Bad;
        }
    }

    #[test]
    fn endpoints_only_move_during_calibration(
        inputs in proptest::collection::vec(tick_strategy(), 1..100)
    ) {
        let mut fsm = LockFsm::restore(
            FsmConfig::default(),
            LockState::Locked,
            120,
            50,
            0,
            None,
        );
        let mut motor = Actuator::new(RecordingServo::default());
        let mut now_ms = 0u64;

        for input in inputs {
            now_ms += input.dt_ms;
            fsm.step(input.deg, now_ms, input.button, input.cmd, &mut motor)
                .unwrap();
            prop_assert_eq!(fsm.lock_deg(), 120);
            prop_assert_eq!(fsm.unlock_deg(), 50);
        }
    }
}
