//! Joystick input handling
//!
//! Implements a two-stage pipeline, both stages polled from the control loop:
//!
//! 1. [`event_collector`] - Raw joystick input collection (gilrs)
//! 2. [`gesture_recognizer`] / [`button_state`] - Flicks, mode switch and
//!    latched buttons
//!
//! # Architecture
//!
//! ```text
//! Joystick ──► Collector ──► GestureRecognizer ──► GestureFlags
//!              (Raw Events)  ButtonStates          latched buttons
//! ```

pub mod button_state;
pub mod event_collector;
pub mod gesture_recognizer;

pub use button_state::ButtonStates;
pub use event_collector::{
    ButtonState, CollectorError, CollectorSettings, EventCollector, InputDevice,
    RawControllerEvent,
};
pub use gesture_recognizer::{
    AxisDirection, AxisGestureState, Axis3State, GestureEvent, GestureFlags, GestureRecognizer,
    Mode,
};
