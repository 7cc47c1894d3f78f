//! Servo link layer
//!
//! Everything above this module talks to a servo through the [`ActuatorLink`]
//! trait only:
//!
//! 1. [`dynamixel`] - Dynamixel protocol 1.0 over a serial port (MX series)
//! 2. [`sim`] - In-process simulated servo for tests and dry runs
//!
//! One link addresses exactly one servo. Links are owned by a single
//! [`FingerController`](crate::hand::FingerController) each.

pub mod dynamixel;
pub mod sim;

pub use dynamixel::{DynamixelBus, ServoLink};
pub use sim::SimServo;

/// Errors reported by a servo link
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Port(String),

    #[error("Servo {id} did not answer: {reason}")]
    NoResponse { id: u8, reason: String },

    #[error("Malformed status packet from servo {id}: {reason}")]
    Malformed { id: u8, reason: String },

    #[error("Servo {id} reported error flags {flags:#04x}")]
    Status { id: u8, flags: u8 },

    #[error("Position {ticks} is outside the encoder range of servo {id}")]
    OutOfRange { id: u8, ticks: i32 },

    #[error("Servo bus lock poisoned")]
    BusPoisoned,
}

/// Sign of the load the servo currently feels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDirection {
    CounterClockwise,
    Clockwise,
}

/// Instantaneous load reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    pub magnitude: u16,
    pub direction: LoadDirection,
}

impl Load {
    /// Decode the raw load word: bits 0-9 hold the magnitude, bit 10 the
    /// direction.
    pub fn from_raw(raw: u16) -> Self {
        let direction = if raw & 0x0400 != 0 {
            LoadDirection::Clockwise
        } else {
            LoadDirection::CounterClockwise
        };
        Self {
            magnitude: raw & 0x03FF,
            direction,
        }
    }
}

/// Torque ceiling stored in EEPROM and the limit currently in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TorqueLimits {
    pub max: u16,
    pub allowed: u16,
}

/// Read/write primitives for one position-controlled servo.
///
/// Positions are absolute encoder ticks.
pub trait ActuatorLink: Send {
    /// Bus id of the addressed servo
    fn id(&self) -> u8;

    fn read_position(&mut self) -> Result<i32, LinkError>;

    fn read_goal_position(&mut self) -> Result<i32, LinkError>;

    /// `true` while the servo is still travelling towards its goal
    fn is_moving(&mut self) -> Result<bool, LinkError>;

    fn set_goal_position(&mut self, ticks: i32) -> Result<(), LinkError>;

    /// Internal temperature in degrees Celsius
    fn read_temperature(&mut self) -> Result<u8, LinkError>;

    fn read_torque_limits(&mut self) -> Result<TorqueLimits, LinkError>;

    fn read_load(&mut self) -> Result<Load, LinkError>;

    fn set_speed(&mut self, speed: u16) -> Result<(), LinkError>;
}
