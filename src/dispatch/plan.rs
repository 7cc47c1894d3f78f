//! Pure mapping from button and gesture state to hand commands

use serde::{Deserialize, Serialize};

use crate::controller::{ButtonStates, GestureFlags, Mode};
use crate::hand::{Direction, FingerId};

/// Joystick button numbers used by the calibration combos
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ButtonBindings {
    /// Button selecting finger 1 to 4, in finger order
    pub finger_buttons: [u8; 4],
    pub tighten: u8,
    pub loosen: u8,
    /// Sends the selected finger back to its start position
    pub home: u8,
}

impl Default for ButtonBindings {
    fn default() -> Self {
        Self {
            finger_buttons: [1, 2, 3, 4],
            tighten: 7,
            loosen: 6,
            home: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandCommand {
    /// Calibration step of a single finger
    FingerDelta { finger: FingerId, direction: Direction },
    FingerHome { finger: FingerId },
    TightenAll,
    LoosenAll,
    Spread,
    Close,
}

/// Commands for one frame, in execution order, and the buttons to forget
/// once they have run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramePlan {
    pub commands: Vec<HandCommand>,
    pub force_cleared: Vec<u8>,
}

/// Evaluate every combo rule, then at most one compound gesture.
///
/// Combo rules only run when `pressed_this_frame` is set, so a held combo
/// fires once rather than on every tick.
pub fn plan_frame(
    buttons: &ButtonStates,
    flags: &GestureFlags,
    bindings: &ButtonBindings,
    pressed_this_frame: bool,
) -> FramePlan {
    let mut plan = FramePlan::default();

    if pressed_this_frame {
        for (finger, button) in FingerId::ALL.into_iter().zip(bindings.finger_buttons) {
            if buttons.combo(button, bindings.tighten) {
                plan.commands.push(HandCommand::FingerDelta {
                    finger,
                    direction: Direction::Close,
                });
            }
            if buttons.combo(button, bindings.loosen) {
                plan.commands.push(HandCommand::FingerDelta {
                    finger,
                    direction: Direction::Open,
                });
            }
        }

        for (finger, button) in FingerId::ALL.into_iter().zip(bindings.finger_buttons) {
            if buttons.combo(button, bindings.home) {
                plan.commands.push(HandCommand::FingerHome { finger });
                plan.force_cleared.extend([button, bindings.home]);
            }
        }
    }

    if let Some(gesture) = compound_gesture(flags) {
        plan.commands.push(gesture);
    }

    plan
}

/// Mode switch plus flick, highest priority first
fn compound_gesture(flags: &GestureFlags) -> Option<HandCommand> {
    match flags.mode {
        Mode::Plus if flags.axis1_plus => Some(HandCommand::TightenAll),
        Mode::Plus if flags.axis1_minus => Some(HandCommand::LoosenAll),
        Mode::Minus if flags.axis0_plus => Some(HandCommand::Spread),
        Mode::Minus if flags.axis0_minus => Some(HandCommand::Close),
        _ => None,
    }
}
