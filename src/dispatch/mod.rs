//! Fixed-rate command loop
//!
//! Each tick the [`CommandDispatcher`]:
//!
//! 1. drains the input device and feeds the recognizer and button states,
//! 2. plans the frame with [`plan_frame`] (combos first, then at most one
//!    compound gesture),
//! 3. runs the planned hand operations, blocking while fingers move,
//! 4. clears the per-frame flick flags and unlatches released buttons.
//!
//! Nothing runs concurrently: while a finger is moving no input is read.

pub mod plan;

pub use plan::{plan_frame, ButtonBindings, FramePlan, HandCommand};

use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Span};

use crate::actuator::ActuatorLink;
use crate::controller::{
    ButtonState, ButtonStates, GestureEvent, GestureRecognizer, InputDevice, RawControllerEvent,
};
use crate::hand::{FingerId, HandController, MoveOutcome};

#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    pub tick_interval: Duration,
    /// Step of the single-finger calibration combos
    pub cal_ticks: i32,
    pub bindings: ButtonBindings,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            cal_ticks: 100,
            bindings: ButtonBindings::default(),
        }
    }
}

/// What one frame did
#[derive(Debug, Default)]
pub struct FrameReport {
    pub gestures: Vec<GestureEvent>,
    pub commands: Vec<HandCommand>,
    pub outcomes: Vec<(FingerId, MoveOutcome)>,
}

pub struct CommandDispatcher<L: ActuatorLink> {
    hand: HandController<L>,
    recognizer: GestureRecognizer,
    buttons: ButtonStates,
    hat: (i8, i8),
    settings: DispatcherSettings,
    span: Span,
}

impl<L: ActuatorLink> CommandDispatcher<L> {
    pub fn new(hand: HandController<L>, button_count: usize, settings: DispatcherSettings) -> Self {
        Self {
            hand,
            recognizer: GestureRecognizer::new(),
            buttons: ButtonStates::new(button_count),
            hat: (0, 0),
            settings,
            span: info_span!("dispatch"),
        }
    }

    pub fn hand(&self) -> &HandController<L> {
        &self.hand
    }

    pub fn recognizer(&self) -> &GestureRecognizer {
        &self.recognizer
    }

    pub fn buttons(&self) -> &ButtonStates {
        &self.buttons
    }

    pub fn hat(&self) -> (i8, i8) {
        self.hat
    }

    /// Run one frame over the events collected since the last one
    pub fn run_frame(&mut self, events: Vec<RawControllerEvent>) -> FrameReport {
        let span = self.span.clone();
        let _entered = span.enter();

        let mut report = FrameReport::default();
        let mut pressed_this_frame = false;

        for event in events {
            match event {
                RawControllerEvent::AxisMotion { axis, value, .. } => {
                    report.gestures.extend(self.recognizer.feed(axis, value));
                }
                RawControllerEvent::ButtonEvent {
                    button,
                    button_state,
                    ..
                } => {
                    pressed_this_frame |= button_state == ButtonState::Pressed;
                    self.buttons.apply(button, button_state);
                }
                RawControllerEvent::HatMotion { value, .. } => {
                    debug!("Hat value: {:?}", value);
                    self.hat = value;
                }
            }
        }

        let plan = plan_frame(
            &self.buttons,
            &self.recognizer.flags(),
            &self.settings.bindings,
            pressed_this_frame,
        );

        for command in &plan.commands {
            self.execute(*command, &mut report.outcomes);
        }
        for button in &plan.force_cleared {
            self.buttons.force_clear(*button);
        }
        self.buttons.release_unheld();

        self.recognizer.clear_axis_flags();
        report.commands = plan.commands;
        report
    }

    /// Tick until `cancel` fires
    pub fn run<D: InputDevice>(&mut self, device: &mut D, cancel: &CancellationToken) {
        info!(
            "Command loop started: {} axes, {} buttons, {} hats, tick {:?}",
            device.axis_count(),
            device.button_count(),
            device.hat_count(),
            self.settings.tick_interval
        );

        let mut frames: u64 = 0;
        let mut commands: u64 = 0;
        let mut last_stats = Instant::now();
        let stats_interval = Duration::from_secs(10);

        while !cancel.is_cancelled() {
            let tick_start = Instant::now();

            let report = self.run_frame(device.poll_frame());
            frames += 1;
            commands += report.commands.len() as u64;

            if last_stats.elapsed() > stats_interval {
                debug!(
                    "Command loop stats: {} frames, {} commands in last {} seconds",
                    frames,
                    commands,
                    stats_interval.as_secs()
                );
                frames = 0;
                commands = 0;
                last_stats = Instant::now();
            }

            if let Some(remaining) = self.settings.tick_interval.checked_sub(tick_start.elapsed()) {
                thread::sleep(remaining);
            }
        }

        info!("Command loop stopped");
    }

    fn execute(&mut self, command: HandCommand, outcomes: &mut Vec<(FingerId, MoveOutcome)>) {
        match command {
            HandCommand::FingerDelta { finger, direction } => {
                info!("{} {:?} by {} ticks", finger, direction, self.settings.cal_ticks);
                let outcome = self
                    .hand
                    .finger_delta(finger, direction, self.settings.cal_ticks);
                outcomes.push((finger, outcome));
            }
            HandCommand::FingerHome { finger } => {
                info!("Sending {} to initial position", finger);
                outcomes.push((finger, self.hand.finger_to_start(finger)));
            }
            HandCommand::TightenAll => {
                info!("Tighten Fingers - Axis 3 plus and Axis 1 plus");
                outcomes.extend(self.hand.tighten_fingers());
            }
            HandCommand::LoosenAll => {
                info!("Loosen Fingers - Axis 3 plus and Axis 1 minus");
                outcomes.extend(self.hand.loosen_fingers());
            }
            HandCommand::Spread => {
                info!("Spread Finger 1 and 2 apart - Axis 3 minus and Axis 0 plus");
                outcomes.push((FingerId::SPREAD, self.hand.spread_pair()));
            }
            HandCommand::Close => {
                info!("Bring Finger 1 and 2 together - Axis 3 minus and Axis 0 minus");
                outcomes.push((FingerId::SPREAD, self.hand.close_pair()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimServo;
    use crate::controller::Mode;
    use crate::hand::{Direction, FingerConfig, MotionTiming};

    fn dispatcher() -> (CommandDispatcher<SimServo>, Vec<SimServo>) {
        let configs = vec![
            FingerConfig::with_travel(13900, 2300, 1, 150),
            FingerConfig::with_travel(16700, 2300, -1, 150),
            FingerConfig::with_travel(14050, 2300, 1, 150),
            FingerConfig::with_travel(16384, 2300, -1, 150),
        ];
        let servos: Vec<SimServo> = configs
            .iter()
            .zip(1u8..)
            .map(|(config, id)| SimServo::new(id, config.lower_limit))
            .collect();
        let timing = MotionTiming {
            move_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            settle: Duration::ZERO,
        };
        let hand = HandController::initialize(servos.clone(), &configs, timing, 200).unwrap();
        (
            CommandDispatcher::new(hand, 12, DispatcherSettings::default()),
            servos,
        )
    }

    #[test]
    fn combo_across_frames_fires_once() {
        let (mut dispatcher, servos) = dispatcher();

        let first = dispatcher.run_frame(vec![RawControllerEvent::button_down(1)]);
        assert!(first.commands.is_empty());

        let second = dispatcher.run_frame(vec![RawControllerEvent::button_down(7)]);
        assert_eq!(
            second.commands,
            vec![HandCommand::FingerDelta {
                finger: FingerId::new(1).unwrap(),
                direction: Direction::Close
            }]
        );
        assert_eq!(servos[0].goal_history(), vec![14000]);

        // Still held, nothing new pressed
        let third = dispatcher.run_frame(Vec::new());
        assert!(third.commands.is_empty());
        assert_eq!(servos[0].goal_history(), vec![14000]);
    }

    #[test]
    fn quick_tap_within_one_frame_still_counts() {
        let (mut dispatcher, servos) = dispatcher();
        dispatcher.run_frame(vec![RawControllerEvent::button_down(2)]);

        let report = dispatcher.run_frame(vec![
            RawControllerEvent::button_down(7),
            RawControllerEvent::button_up(7),
        ]);
        assert_eq!(report.commands.len(), 1);
        assert_eq!(servos[1].goal_history(), vec![16600]);
        assert!(!dispatcher.buttons().is_latched(7));
        assert!(dispatcher.buttons().is_latched(2));
    }

    #[test]
    fn released_button_does_not_join_a_later_combo() {
        let (mut dispatcher, servos) = dispatcher();
        dispatcher.run_frame(vec![RawControllerEvent::button_down(1)]);
        dispatcher.run_frame(vec![RawControllerEvent::button_up(1)]);

        let report = dispatcher.run_frame(vec![RawControllerEvent::button_down(7)]);
        assert!(report.commands.is_empty());
        assert!(servos[0].goal_history().is_empty());
    }

    #[test]
    fn home_combo_resets_buttons_and_finger() {
        let (mut dispatcher, servos) = dispatcher();
        dispatcher.run_frame(vec![
            RawControllerEvent::button_down(3),
            RawControllerEvent::button_down(7),
        ]);
        assert_eq!(servos[2].position(), 14150);

        let report = dispatcher.run_frame(vec![RawControllerEvent::button_down(10)]);
        assert!(report
            .commands
            .contains(&HandCommand::FingerHome {
                finger: FingerId::new(3).unwrap()
            }));
        assert_eq!(servos[2].position(), 14050);
        assert!(!dispatcher.buttons().is_pressed(3));
        assert!(!dispatcher.buttons().is_latched(10));
    }

    #[test]
    fn compound_gesture_priority_and_flag_reset() {
        let (mut dispatcher, servos) = dispatcher();
        let report = dispatcher.run_frame(vec![
            RawControllerEvent::axis(3, 0.995),
            RawControllerEvent::axis(1, 0.6),
            RawControllerEvent::axis(1, 0.0),
            RawControllerEvent::axis(0, 0.6),
            RawControllerEvent::axis(0, 0.0),
        ]);

        assert_eq!(report.commands, vec![HandCommand::TightenAll]);
        assert!(servos[3].goal_history().is_empty());
        assert_eq!(report.outcomes.len(), 3);

        // Flicks are consumed, the mode is not
        let flags = dispatcher.recognizer().flags();
        assert!(!flags.axis0_plus && !flags.axis1_plus);
        assert_eq!(flags.mode, Mode::Plus);
        assert!(dispatcher.run_frame(Vec::new()).commands.is_empty());
    }

    #[test]
    fn unconsumed_flicks_do_not_carry_over() {
        let (mut dispatcher, servos) = dispatcher();
        dispatcher.run_frame(vec![
            RawControllerEvent::axis(0, 0.8),
            RawControllerEvent::axis(0, 0.0),
        ]);

        let report = dispatcher.run_frame(vec![RawControllerEvent::axis(3, -1.0)]);
        assert!(report.commands.is_empty());
        assert!(servos[3].goal_history().is_empty());
    }

    #[test]
    fn hat_motion_is_tracked() {
        let (mut dispatcher, _) = dispatcher();
        dispatcher.run_frame(vec![RawControllerEvent::HatMotion {
            value: (1, 0),
            timestamp: chrono::Local::now(),
        }]);
        assert_eq!(dispatcher.hat(), (1, 0));
    }
}
