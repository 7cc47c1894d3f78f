//! Axis samples to latched gesture flags
//!
//! Axes 0 and 1 are flicked: a latch arms once the stick leaves the
//! [-0.5, +0.5] band and fires when it springs back to exactly zero. Axis 2
//! (twist) is tracked the same way but never fires, because pushing the
//! stick sideways or forward twists it a little too. Axis 3 (throttle) is a
//! three-position mode switch that only reports changes.

use tracing::{debug, info, info_span, Span};

/// Dead band around the center that a flick has to leave
pub const HYSTERESIS: f32 = 0.5;
/// Throttle deflection that selects a mode
pub const MODE_THRESHOLD: f32 = 0.99;
pub const MODE_AXIS: u8 = 3;
const TRACKED_AXES: usize = 3;
const SILENT_AXIS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisDirection {
    Plus,
    Minus,
}

/// Flick tracking for one of axes 0 to 2
#[derive(Debug, Clone, PartialEq)]
pub struct AxisGestureState {
    pub min_seen: f32,
    pub max_seen: f32,
    /// Number of samples that pushed the extremes further out
    pub crossing_count: u32,
    last_recorded: Option<f32>,
    pub plus: bool,
    pub minus: bool,
}

impl Default for AxisGestureState {
    fn default() -> Self {
        Self {
            min_seen: -HYSTERESIS,
            max_seen: HYSTERESIS,
            crossing_count: 0,
            last_recorded: None,
            plus: false,
            minus: false,
        }
    }
}

impl AxisGestureState {
    /// Feed one sample; returns the directions armed by a return to center,
    /// minus before plus.
    fn sample(&mut self, value: f32) -> Vec<AxisDirection> {
        if value > self.max_seen {
            self.max_seen = value;
            self.record(value);
        } else if value < self.min_seen {
            self.min_seen = value;
            self.record(value);
        }

        let mut crossed = Vec::new();
        let returned_to_center = value == 0.0 && self.last_recorded.is_some_and(|last| last != 0.0);
        if !returned_to_center {
            return crossed;
        }
        if self.min_seen < -HYSTERESIS {
            self.min_seen = -HYSTERESIS;
            crossed.push(AxisDirection::Minus);
        }
        if self.max_seen > HYSTERESIS {
            self.max_seen = HYSTERESIS;
            crossed.push(AxisDirection::Plus);
        }
        crossed
    }

    fn record(&mut self, value: f32) {
        self.last_recorded = Some(value);
        self.crossing_count += 1;
    }

    fn clear_flags(&mut self) {
        self.plus = false;
        self.minus = false;
    }
}

/// Position of the mode switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Neutral,
    Plus,
    Minus,
}

impl Mode {
    fn from_sample(value: f32) -> Self {
        if value > MODE_THRESHOLD {
            Mode::Plus
        } else if value < -MODE_THRESHOLD {
            Mode::Minus
        } else {
            Mode::Neutral
        }
    }
}

/// Edge-detected mode switch on axis 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Axis3State {
    pub state: Mode,
    pub previous: Mode,
}

impl Axis3State {
    /// Returns the transition if the sample changed the mode
    fn sample(&mut self, value: f32) -> Option<(Mode, Mode)> {
        self.previous = self.state;
        self.state = Mode::from_sample(value);
        (self.state != self.previous).then_some((self.previous, self.state))
    }

    pub fn plus(&self) -> bool {
        self.state == Mode::Plus
    }

    pub fn minus(&self) -> bool {
        self.state == Mode::Minus
    }
}

/// Something the recognizer noticed in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    Latched { axis: u8, direction: AxisDirection },
    ModeChanged { from: Mode, to: Mode },
}

/// Snapshot of the flags the command rules look at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GestureFlags {
    pub mode: Mode,
    pub axis0_plus: bool,
    pub axis0_minus: bool,
    pub axis1_plus: bool,
    pub axis1_minus: bool,
}

pub struct GestureRecognizer {
    axes: [AxisGestureState; TRACKED_AXES],
    mode: Axis3State,
    span: Span,
}

impl Default for GestureRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureRecognizer {
    pub fn new() -> Self {
        Self {
            axes: Default::default(),
            mode: Axis3State::default(),
            span: info_span!("gestures"),
        }
    }

    pub fn feed(&mut self, axis: u8, value: f32) -> Vec<GestureEvent> {
        let _entered = self.span.enter();

        if axis == MODE_AXIS {
            return match self.mode.sample(value) {
                Some((from, to)) => {
                    info!("Joystick Axis 3 mode {:?} -> {:?}", from, to);
                    vec![GestureEvent::ModeChanged { from, to }]
                }
                None => Vec::new(),
            };
        }

        let Some(state) = self.axes.get_mut(axis as usize) else {
            debug!("Axis {} is not used for gestures", axis);
            return Vec::new();
        };

        let mut events = Vec::new();
        for direction in state.sample(value) {
            if axis == SILENT_AXIS {
                debug!("Axis 2 {:?} movement ignored", direction);
                continue;
            }
            match direction {
                AxisDirection::Plus => state.plus = true,
                AxisDirection::Minus => state.minus = true,
            }
            info!("Joystick Axis {} {:?} movement", axis, direction);
            events.push(GestureEvent::Latched { axis, direction });
        }
        events
    }

    pub fn axis(&self, axis: u8) -> Option<&AxisGestureState> {
        self.axes.get(axis as usize)
    }

    pub fn mode(&self) -> Axis3State {
        self.mode
    }

    pub fn flags(&self) -> GestureFlags {
        GestureFlags {
            mode: self.mode.state,
            axis0_plus: self.axes[0].plus,
            axis0_minus: self.axes[0].minus,
            axis1_plus: self.axes[1].plus,
            axis1_minus: self.axes[1].minus,
        }
    }

    /// Drop the per-frame flick flags. The mode switch is left alone.
    pub fn clear_axis_flags(&mut self) {
        self.axes.iter_mut().for_each(AxisGestureState::clear_flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(recognizer: &mut GestureRecognizer, axis: u8, samples: &[f32]) -> Vec<GestureEvent> {
        samples
            .iter()
            .flat_map(|value| recognizer.feed(axis, *value))
            .collect()
    }

    #[test]
    fn flick_and_hold_latches_plus_once() {
        let mut recognizer = GestureRecognizer::new();
        let events = feed_all(&mut recognizer, 0, &[0.0, 0.6, 0.6, 0.0, 0.0]);

        assert_eq!(
            events,
            vec![GestureEvent::Latched {
                axis: 0,
                direction: AxisDirection::Plus
            }]
        );
        let flags = recognizer.flags();
        assert!(flags.axis0_plus);
        assert!(!flags.axis0_minus);
    }

    #[test]
    fn minus_then_plus_latch_in_order() {
        let mut recognizer = GestureRecognizer::new();
        let events = feed_all(&mut recognizer, 1, &[0.0, -0.6, 0.0, 0.6, 0.0]);

        assert_eq!(
            events,
            vec![
                GestureEvent::Latched {
                    axis: 1,
                    direction: AxisDirection::Minus
                },
                GestureEvent::Latched {
                    axis: 1,
                    direction: AxisDirection::Plus
                },
            ]
        );
    }

    #[test]
    fn small_wobble_inside_band_never_latches() {
        let mut recognizer = GestureRecognizer::new();
        let events = feed_all(&mut recognizer, 0, &[0.2, 0.45, 0.0, -0.4, 0.0]);
        assert!(events.is_empty());
        assert_eq!(recognizer.axis(0).unwrap().crossing_count, 0);
    }

    #[test]
    fn crossing_count_tracks_new_extremes() {
        let mut recognizer = GestureRecognizer::new();
        feed_all(&mut recognizer, 0, &[0.55, 0.7, 0.65, 0.9]);
        let state = recognizer.axis(0).unwrap();
        assert_eq!(state.crossing_count, 3);
        assert!((state.max_seen - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn axis_two_never_raises_flags() {
        let mut recognizer = GestureRecognizer::new();
        let events = feed_all(&mut recognizer, 2, &[0.8, 0.0, -0.8, 0.0]);

        assert!(events.is_empty());
        let state = recognizer.axis(2).unwrap();
        assert!(!state.plus && !state.minus);
        assert_eq!(state.max_seen, HYSTERESIS);
        assert_eq!(state.min_seen, -HYSTERESIS);
    }

    #[test]
    fn held_throttle_changes_mode_once() {
        let mut recognizer = GestureRecognizer::new();
        let events = feed_all(&mut recognizer, MODE_AXIS, &[0.995, 0.995, 0.995]);

        assert_eq!(
            events,
            vec![GestureEvent::ModeChanged {
                from: Mode::Neutral,
                to: Mode::Plus
            }]
        );
        assert!(recognizer.mode().plus());
    }

    #[test]
    fn mode_persists_until_throttle_moves_away() {
        let mut recognizer = GestureRecognizer::new();
        recognizer.feed(MODE_AXIS, -1.0);
        recognizer.clear_axis_flags();
        assert_eq!(recognizer.flags().mode, Mode::Minus);

        let events = recognizer.feed(MODE_AXIS, 0.3);
        assert_eq!(
            events,
            vec![GestureEvent::ModeChanged {
                from: Mode::Minus,
                to: Mode::Neutral
            }]
        );
        assert!(!recognizer.mode().minus());
    }

    #[test]
    fn clearing_flags_keeps_extremes_reset() {
        let mut recognizer = GestureRecognizer::new();
        feed_all(&mut recognizer, 1, &[0.7, 0.0]);
        assert!(recognizer.flags().axis1_plus);

        recognizer.clear_axis_flags();
        assert_eq!(recognizer.flags(), GestureFlags::default());
    }
}
