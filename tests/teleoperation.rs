//! Joystick frames in, servo goals out, with simulated servos.

use std::collections::VecDeque;
use std::time::Duration;

use openhand::actuator::SimServo;
use openhand::config::HandConfig;
use openhand::controller::{InputDevice, RawControllerEvent};
use openhand::dispatch::{CommandDispatcher, HandCommand};
use openhand::hand::{FingerId, FingerStatus, HandController, MotionTiming, MoveOutcome};
use tokio_util::sync::CancellationToken;

/// Replays one queued frame per poll and cancels the loop once empty
struct ScriptedDevice {
    frames: VecDeque<Vec<RawControllerEvent>>,
    cancel: CancellationToken,
}

impl ScriptedDevice {
    fn new(frames: Vec<Vec<RawControllerEvent>>, cancel: CancellationToken) -> Self {
        Self {
            frames: frames.into(),
            cancel,
        }
    }
}

impl InputDevice for ScriptedDevice {
    fn axis_count(&self) -> usize {
        4
    }

    fn button_count(&self) -> usize {
        12
    }

    fn hat_count(&self) -> usize {
        1
    }

    fn poll_frame(&mut self) -> Vec<RawControllerEvent> {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None => {
                self.cancel.cancel();
                Vec::new()
            }
        }
    }
}

fn finger(id: u8) -> FingerId {
    FingerId::new(id).unwrap()
}

fn setup() -> (CommandDispatcher<SimServo>, Vec<SimServo>) {
    let mut config = HandConfig::default();
    config.tick_interval_ms = 1;
    config.move_timeout_ms = 20;
    config.poll_interval_ms = 1;
    config.settle_ms = 0;

    let servos: Vec<SimServo> = FingerId::ALL
        .into_iter()
        .zip(&config.fingers)
        .map(|(id, finger)| SimServo::new(id.get(), finger.lower_limit))
        .collect();
    let hand = HandController::initialize(
        servos.clone(),
        &config.fingers,
        config.timing(),
        config.delta_ticks,
    )
    .unwrap();

    (
        CommandDispatcher::new(hand, 12, config.dispatcher_settings()),
        servos,
    )
}

fn positions(servos: &[SimServo]) -> Vec<i32> {
    servos.iter().map(SimServo::position).collect()
}

#[test]
fn run_loop_replays_frames_until_cancelled() {
    let (mut dispatcher, servos) = setup();
    let cancel = CancellationToken::new();
    let mut device = ScriptedDevice::new(
        vec![
            vec![RawControllerEvent::button_down(1)],
            vec![RawControllerEvent::button_down(7)],
            Vec::new(),
            vec![
                RawControllerEvent::button_up(7),
                RawControllerEvent::button_up(1),
            ],
        ],
        cancel.clone(),
    );

    dispatcher.run(&mut device, &cancel);

    assert!(cancel.is_cancelled());
    assert_eq!(servos[0].goal_history(), vec![14000]);
    assert!(servos[1..].iter().all(|s| s.goal_history().is_empty()));
    assert!(!dispatcher.buttons().is_latched(1));
}

#[test]
fn tighten_then_loosen_restores_every_finger() {
    let (mut dispatcher, servos) = setup();
    let start = positions(&servos);

    let tighten = dispatcher.run_frame(vec![
        RawControllerEvent::axis(3, 0.995),
        RawControllerEvent::axis(1, 0.6),
        RawControllerEvent::axis(1, 0.0),
    ]);
    assert_eq!(tighten.commands, vec![HandCommand::TightenAll]);
    assert_eq!(positions(&servos), vec![14100, 16500, 14250, 16384]);

    let loosen = dispatcher.run_frame(vec![
        RawControllerEvent::axis(1, -0.6),
        RawControllerEvent::axis(1, 0.0),
    ]);
    assert_eq!(loosen.commands, vec![HandCommand::LoosenAll]);
    assert_eq!(positions(&servos), start);
}

#[test]
fn loosening_at_start_never_passes_lower_limit() {
    let (mut dispatcher, servos) = setup();

    let report = dispatcher.run_frame(vec![
        RawControllerEvent::axis(3, 1.0),
        RawControllerEvent::axis(1, -0.7),
        RawControllerEvent::axis(1, 0.0),
    ]);

    assert_eq!(report.outcomes.len(), 3);
    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| matches!(outcome, MoveOutcome::Rejected { .. })));
    assert!(servos.iter().all(|s| s.goal_history().is_empty()));
}

#[test]
fn spread_and_close_only_move_finger_four() {
    let (mut dispatcher, servos) = setup();

    dispatcher.run_frame(vec![
        RawControllerEvent::axis(3, -1.0),
        RawControllerEvent::axis(0, 0.8),
        RawControllerEvent::axis(0, 0.0),
    ]);
    assert_eq!(servos[3].position(), 16184);

    let close = dispatcher.run_frame(vec![
        RawControllerEvent::axis(0, -0.8),
        RawControllerEvent::axis(0, 0.0),
    ]);
    assert_eq!(close.commands, vec![HandCommand::Close]);
    assert_eq!(servos[3].position(), 16384);
    assert!(servos[..3].iter().all(|s| s.goal_history().is_empty()));
}

#[test]
fn settle_timeout_skips_finger_and_keeps_going() {
    let (mut dispatcher, servos) = setup();
    servos[0].set_stalled(true);

    let report = dispatcher.run_frame(vec![
        RawControllerEvent::axis(3, 1.0),
        RawControllerEvent::axis(1, 0.6),
        RawControllerEvent::axis(1, 0.0),
    ]);

    assert!(matches!(report.outcomes[0], (_, MoveOutcome::TimedOut { .. })));
    assert!(matches!(report.outcomes[1], (_, MoveOutcome::Moved { .. })));
    assert!(matches!(report.outcomes[2], (_, MoveOutcome::Moved { .. })));
    assert_eq!(dispatcher.hand().finger(finger(1)).status(), FingerStatus::Ready);
}

#[test]
fn link_failure_faults_finger_until_homed() {
    let (mut dispatcher, servos) = setup();
    servos[2].set_offline(true);

    let failed = dispatcher.run_frame(vec![
        RawControllerEvent::button_down(3),
        RawControllerEvent::button_down(7),
    ]);
    assert!(matches!(failed.outcomes[0], (_, MoveOutcome::Faulted(_))));
    assert_eq!(dispatcher.hand().finger(finger(3)).status(), FingerStatus::Faulted);

    servos[2].set_offline(false);
    dispatcher.run_frame(vec![RawControllerEvent::button_up(7)]);

    // Still faulted even though the servo answers again
    let skipped = dispatcher.run_frame(vec![RawControllerEvent::button_down(7)]);
    assert_eq!(skipped.outcomes, vec![(finger(3), MoveOutcome::Unavailable)]);
    dispatcher.run_frame(vec![RawControllerEvent::button_up(7)]);

    let homed = dispatcher.run_frame(vec![RawControllerEvent::button_down(10)]);
    assert_eq!(homed.commands, vec![HandCommand::FingerHome { finger: finger(3) }]);
    assert_eq!(dispatcher.hand().finger(finger(3)).status(), FingerStatus::Ready);

    let moved = dispatcher.run_frame(vec![
        RawControllerEvent::button_down(3),
        RawControllerEvent::button_down(7),
    ]);
    assert!(matches!(moved.outcomes[0], (_, MoveOutcome::Moved { to: 14150, .. })));
    assert_eq!(servos[2].position(), 14150);
}

#[test]
fn tick_interval_paces_the_loop() {
    let (mut dispatcher, _) = setup();
    let cancel = CancellationToken::new();
    let mut device = ScriptedDevice::new(vec![Vec::new(); 5], cancel.clone());

    let started = std::time::Instant::now();
    dispatcher.run(&mut device, &cancel);

    // Five scripted frames plus the one that cancels, at 1 ms each
    assert!(started.elapsed() >= Duration::from_millis(5));
}
