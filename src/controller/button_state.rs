//! Live and latched button tracking for cross-frame combos
//!
//! A button is latched on press and stays latched until a frame ends with
//! the button released, so two buttons pressed in different frames still
//! count as a combo while both are held.

use tracing::{debug, warn};

use super::event_collector::ButtonState;

#[derive(Debug, Clone, Default)]
pub struct ButtonStates {
    pressed: Vec<bool>,
    latched: Vec<bool>,
}

impl ButtonStates {
    pub fn new(button_count: usize) -> Self {
        Self {
            pressed: vec![false; button_count],
            latched: vec![false; button_count],
        }
    }

    pub fn len(&self) -> usize {
        self.pressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty()
    }

    /// Record a press or release. Unknown buttons are ignored.
    pub fn apply(&mut self, button: u8, state: ButtonState) {
        let index = button as usize;
        if index >= self.pressed.len() {
            warn!("Ignoring event for unknown button {}", button);
            return;
        }
        match state {
            ButtonState::Pressed => {
                self.pressed[index] = true;
                self.latched[index] = true;
                debug!("Button {} pressed", button);
            }
            ButtonState::Released => {
                self.pressed[index] = false;
                debug!("Button {} released", button);
            }
        }
    }

    pub fn is_pressed(&self, button: u8) -> bool {
        self.pressed.get(button as usize).copied().unwrap_or(false)
    }

    pub fn is_latched(&self, button: u8) -> bool {
        self.latched.get(button as usize).copied().unwrap_or(false)
    }

    /// Both buttons latched
    pub fn combo(&self, first: u8, second: u8) -> bool {
        self.is_latched(first) && self.is_latched(second)
    }

    /// Forget a button entirely, in case its release event gets lost
    pub fn force_clear(&mut self, button: u8) {
        let index = button as usize;
        if index < self.pressed.len() {
            self.pressed[index] = false;
            self.latched[index] = false;
        }
    }

    /// End of frame: unlatch every button that is no longer held
    pub fn release_unheld(&mut self) {
        for (latched, pressed) in self.latched.iter_mut().zip(&self.pressed) {
            if !*pressed {
                *latched = false;
            }
        }
    }
}
