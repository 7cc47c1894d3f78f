use chrono::{DateTime, Local};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use tracing::{debug, error, info, warn};

/// Numbered axes exposed to the gesture layer: 0 X, 1 Y, 2 twist, 3 throttle
pub const AXIS_COUNT: usize = 4;
pub const HAT_COUNT: usize = 1;

// Button numbers are positions in this table
const BUTTON_LAYOUT: [Button; 15] = [
    Button::South,
    Button::East,
    Button::North,
    Button::West,
    Button::C,
    Button::Z,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
];
pub const BUTTON_COUNT: usize = BUTTON_LAYOUT.len();

// Raw controller event with precise chrono timestamps
#[derive(Debug, Clone)]
pub enum RawControllerEvent {
    AxisMotion {
        axis: u8,
        value: f32,
        timestamp: DateTime<Local>,
    },
    ButtonEvent {
        button: u8,
        button_state: ButtonState,
        timestamp: DateTime<Local>,
    },
    HatMotion {
        value: (i8, i8),
        timestamp: DateTime<Local>,
    },
}

impl RawControllerEvent {
    pub fn axis(axis: u8, value: f32) -> Self {
        RawControllerEvent::AxisMotion {
            axis,
            value,
            timestamp: Local::now(),
        }
    }

    pub fn button_down(button: u8) -> Self {
        RawControllerEvent::ButtonEvent {
            button,
            button_state: ButtonState::Pressed,
            timestamp: Local::now(),
        }
    }

    pub fn button_up(button: u8) -> Self {
        RawControllerEvent::ButtonEvent {
            button,
            button_state: ButtonState::Released,
            timestamp: Local::now(),
        }
    }
}

// Button state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

/// Source of joystick events, polled once per control frame
pub trait InputDevice {
    fn axis_count(&self) -> usize;
    fn button_count(&self) -> usize;
    fn hat_count(&self) -> usize;

    /// Everything that happened since the previous call. Never blocks.
    fn poll_frame(&mut self) -> Vec<RawControllerEvent>;
}

// Collector settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectorSettings {
    pub joystick_deadzone: f32,
    /// Axes whose sign is flipped; gilrs reports "stick forward" as positive
    pub inverted_axes: Vec<u8>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
            inverted_axes: vec![1],
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct EventCollector<S: CollectionState> {
    // Gilrs context
    gilrs: Gilrs,

    // Active gamepad
    active_gamepad: Option<GamepadId>,

    // Collector settings
    settings: CollectorSettings,

    // Last hat position, updated from d-pad buttons and axes
    hat: (i8, i8),
}

// Implementation of methods available in all states
impl<S: CollectionState> EventCollector<S> {
    // Get a reference to the current settings
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

// Implementation for Initializing state
impl EventCollector<Initializing> {
    pub fn create(settings: Option<CollectorSettings>) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);

        // Initialize gilrs with logging
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(gilrs, None, settings, (0, 0)))
    }

    // Pick the joystick and transition to Collecting state
    pub fn initialize(mut self) -> Result<EventCollector<Collecting>, CollectorError> {
        let joysticks: Vec<(GamepadId, String)> = self
            .gilrs
            .gamepads()
            .map(|(id, gamepad)| (id, gamepad.name().to_string()))
            .collect();

        match joysticks.first() {
            None => warn!("No joystick connected, waiting for one to appear"),
            Some((id, name)) => {
                for (idx, (id, name)) in joysticks.iter().enumerate() {
                    info!("  [{}] ID: {}, Name: {}", idx, id, name);
                }
                self.active_gamepad = Some(*id);
                info!("Selected joystick: {} ({})", name, id);
            }
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

// Implementation for Controller in Collecting state
impl EventCollector<Collecting> {
    fn next_raw_event(&mut self) -> Option<Option<RawControllerEvent>> {
        let Event { id, event, .. } = self.gilrs.next_event()?;

        match self.active_gamepad {
            None => {
                info!("Adopting joystick {} as active device", id);
                self.active_gamepad = Some(id);
            }
            Some(active_id) if active_id != id => {
                debug!("Skipping event from non-active joystick: {:?}", id);
                return Some(None);
            }
            _ => {}
        }

        Some(self.convert_gilrs_event(event))
    }

    // Convert gilrs event to internal event type with chrono timestamp
    fn convert_gilrs_event(&mut self, event: EventType) -> Option<RawControllerEvent> {
        let timestamp = Local::now();

        match event {
            EventType::AxisChanged(Axis::DPadX, value, _) => {
                self.hat.0 = value.round() as i8;
                Some(self.hat_event(timestamp))
            }
            EventType::AxisChanged(Axis::DPadY, value, _) => {
                self.hat.1 = value.round() as i8;
                Some(self.hat_event(timestamp))
            }
            EventType::AxisChanged(axis, value, _) => {
                let Some(index) = axis_index(axis) else {
                    debug!("Ignoring unsupported axis: {:?}", axis);
                    return None;
                };
                let value = condition_axis(index, value, &self.settings);
                debug!("Axis {} = {:.4}", index, value);
                Some(RawControllerEvent::AxisMotion {
                    axis: index,
                    value,
                    timestamp,
                })
            }
            EventType::ButtonPressed(button, _) => {
                if let Some(hat) = dpad_direction(button) {
                    self.hat = hat;
                    return Some(self.hat_event(timestamp));
                }
                button_index(button).map(|button| {
                    debug!("Button {} pressed", button);
                    RawControllerEvent::ButtonEvent {
                        button,
                        button_state: ButtonState::Pressed,
                        timestamp,
                    }
                })
            }
            EventType::ButtonReleased(button, _) => {
                if dpad_direction(button).is_some() {
                    self.hat = (0, 0);
                    return Some(self.hat_event(timestamp));
                }
                button_index(button).map(|button| {
                    debug!("Button {} released", button);
                    RawControllerEvent::ButtonEvent {
                        button,
                        button_state: ButtonState::Released,
                        timestamp,
                    }
                })
            }
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
                None
            }
            EventType::Connected => {
                info!("Joystick connected event detected");
                None
            }
            EventType::Disconnected => {
                warn!("Joystick disconnected, waiting for it to come back");
                self.active_gamepad = None;
                None
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }

    fn hat_event(&self, timestamp: DateTime<Local>) -> RawControllerEvent {
        RawControllerEvent::HatMotion {
            value: self.hat,
            timestamp,
        }
    }
}

impl InputDevice for EventCollector<Collecting> {
    fn axis_count(&self) -> usize {
        AXIS_COUNT
    }

    fn button_count(&self) -> usize {
        BUTTON_COUNT
    }

    fn hat_count(&self) -> usize {
        HAT_COUNT
    }

    fn poll_frame(&mut self) -> Vec<RawControllerEvent> {
        let mut events = Vec::new();
        while let Some(converted) = self.next_raw_event() {
            events.extend(converted);
        }
        if !events.is_empty() {
            debug!("Collected {} events for this frame", events.len());
        }
        events
    }
}

// Helper function to map gilrs Axis to our axis number
fn axis_index(axis: Axis) -> Option<u8> {
    match axis {
        Axis::LeftStickX => Some(0),
        Axis::LeftStickY => Some(1),
        Axis::RightZ => Some(2),
        Axis::LeftZ => Some(3),
        _ => None,
    }
}

// Helper function to map gilrs Button to our button number
fn button_index(button: Button) -> Option<u8> {
    BUTTON_LAYOUT
        .iter()
        .position(|candidate| *candidate == button)
        .map(|index| index as u8)
}

fn dpad_direction(button: Button) -> Option<(i8, i8)> {
    match button {
        Button::DPadUp => Some((0, 1)),
        Button::DPadDown => Some((0, -1)),
        Button::DPadLeft => Some((-1, 0)),
        Button::DPadRight => Some((1, 0)),
        _ => None,
    }
}

// Deadzone and inversion; everything outside the deadzone passes through
// unscaled so gesture thresholds see device values
fn condition_axis(index: u8, value: f32, settings: &CollectorSettings) -> f32 {
    let value = apply_deadzone(value, settings.joystick_deadzone);
    if settings.inverted_axes.contains(&index) {
        -value
    } else {
        value
    }
}

// Snap small deflections to exactly zero so centering reads as a crossing
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{AxisDirection, GestureEvent, GestureRecognizer, Mode};

    #[test]
    fn deadzone_snaps_to_zero_and_passes_the_rest() {
        assert_eq!(apply_deadzone(0.03, 0.05), 0.0);
        assert_eq!(apply_deadzone(-0.049, 0.05), 0.0);
        assert_eq!(apply_deadzone(0.52, 0.05), 0.52);
        assert_eq!(apply_deadzone(-0.6, 0.05), -0.6);
    }

    #[test]
    fn conditioned_samples_keep_gesture_thresholds() {
        let settings = CollectorSettings::default();
        let mut recognizer = GestureRecognizer::new();

        let mut events = Vec::new();
        for raw in [0.0, 0.52, 0.02] {
            events.extend(recognizer.feed(0, condition_axis(0, raw, &settings)));
        }
        events.extend(recognizer.feed(3, condition_axis(3, 0.9904, &settings)));

        assert_eq!(
            events,
            vec![
                GestureEvent::Latched {
                    axis: 0,
                    direction: AxisDirection::Plus
                },
                GestureEvent::ModeChanged {
                    from: Mode::Neutral,
                    to: Mode::Plus
                },
            ]
        );
    }

    #[test]
    fn inverted_axis_flips_sign() {
        let settings = CollectorSettings::default();
        assert_eq!(condition_axis(1, 0.7, &settings), -0.7);
        assert_eq!(condition_axis(0, 0.7, &settings), 0.7);
        assert_eq!(condition_axis(1, 0.01, &settings), 0.0);
    }

    #[test]
    fn default_bindings_land_on_expected_buttons() {
        assert_eq!(button_index(Button::East), Some(1));
        assert_eq!(button_index(Button::LeftTrigger), Some(6));
        assert_eq!(button_index(Button::RightTrigger), Some(7));
        assert_eq!(button_index(Button::Select), Some(10));
        assert_eq!(button_index(Button::DPadUp), None);
    }

    #[test]
    fn axes_map_to_stick_layout() {
        assert_eq!(axis_index(Axis::LeftStickX), Some(0));
        assert_eq!(axis_index(Axis::LeftStickY), Some(1));
        assert_eq!(axis_index(Axis::RightZ), Some(2));
        assert_eq!(axis_index(Axis::LeftZ), Some(3));
        assert_eq!(axis_index(Axis::RightStickX), None);
    }
}
