//! Single finger motion control with travel-limit enforcement

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Span};

use super::HandError;
use crate::actuator::{ActuatorLink, Load, LinkError, TorqueLimits};

/// Finger number on the hand, 1 to 4. Finger 4 is the spread axis that
/// swings fingers 1 and 2 apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerId(u8);

impl FingerId {
    pub const ALL: [FingerId; 4] = [FingerId(1), FingerId(2), FingerId(3), FingerId(4)];
    pub const GRASPING: [FingerId; 3] = [FingerId(1), FingerId(2), FingerId(3)];
    pub const SPREAD: FingerId = FingerId(4);

    pub fn new(id: u8) -> Option<Self> {
        (1..=4).contains(&id).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for FingerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Finger{}", self.0)
    }
}

/// Requested motion relative to the hand, independent of servo mounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Close,
    Open,
}

impl Direction {
    pub fn value(self) -> i32 {
        match self {
            Direction::Close => 1,
            Direction::Open => -1,
        }
    }
}

/// Whether increasing encoder ticks close (+1) or open (-1) the finger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSign {
    Positive,
    Negative,
}

impl RotationSign {
    pub fn value(self) -> i32 {
        match self {
            RotationSign::Positive => 1,
            RotationSign::Negative => -1,
        }
    }
}

impl TryFrom<i8> for RotationSign {
    type Error = FingerError;

    fn try_from(raw: i8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(RotationSign::Positive),
            -1 => Ok(RotationSign::Negative),
            other => Err(FingerError::InvalidRotation(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FingerError {
    #[error("Rotation value {0} is not -1 or +1")]
    InvalidRotation(i8),
}

/// Calibration record for one finger
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct FingerConfig {
    /// Start position; moves never go past it in the opening direction
    pub lower_limit: i32,

    /// Fully closed position.
    ///
    /// Informational only: moves are NOT checked against it. Only the lower
    /// limit is enforced until operators confirm the closed end should be a
    /// hard stop as well.
    pub upper_limit: i32,

    /// Raw rotation sign, +1 or -1. Anything else rejects every move of
    /// this finger.
    pub rotation_sign: i8,

    /// Moving speed register value written at startup
    pub speed: u16,
}

impl FingerConfig {
    /// Derive the upper limit from the start position and the travel needed
    /// to grasp.
    pub fn with_travel(lower_limit: i32, travel: i32, rotation_sign: i8, speed: u16) -> Self {
        Self {
            lower_limit,
            upper_limit: lower_limit + rotation_sign as i32 * travel,
            rotation_sign,
            speed,
        }
    }
}

/// Waiting behaviour of a finger
#[derive(Clone, Copy, Debug)]
pub struct MotionTiming {
    /// Longest wait for a commanded move to finish
    pub move_timeout: Duration,
    /// Pause between two "is moving" polls
    pub poll_interval: Duration,
    /// Fixed wait after sending a finger back to its start position
    pub settle: Duration,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            move_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(5),
            settle: Duration::from_secs(5),
        }
    }
}

/// Result of waiting for a servo to stop
#[derive(Debug, Clone, PartialEq)]
pub enum Settle {
    Settled(i32),
    TimedOut,
    Faulted(LinkError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The target would pass the start position
    LowerLimit { attempted: i32 },
    InvalidRotation(i8),
    /// The step does not fit the encoder range
    StepOutOfRange { ticks: i32 },
}

/// What happened to a move request
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Moved { from: i32, to: i32 },
    /// Nothing was written to the servo
    Rejected { position: i32, reason: RejectReason },
    /// Goal was written but the servo had not stopped in time
    TimedOut { goal: i32 },
    /// The link failed; the finger is unavailable until re-homed
    Faulted(LinkError),
    /// The finger is faulted and the request was dropped
    Unavailable,
}

impl MoveOutcome {
    /// Position the finger is known to be at after the request
    pub fn position(&self) -> Option<i32> {
        match self {
            MoveOutcome::Moved { to, .. } => Some(*to),
            MoveOutcome::Rejected { position, .. } => Some(*position),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerStatus {
    Ready,
    Faulted,
}

/// Owns one finger's servo link, calibration and last known state
pub struct FingerController<L: ActuatorLink> {
    id: FingerId,
    link: L,
    config: FingerConfig,
    timing: MotionTiming,
    initial_position: i32,
    current_position: i32,
    goal_position: i32,
    temperature: u8,
    torque: TorqueLimits,
    status: FingerStatus,
    span: Span,
}

impl<L: ActuatorLink> FingerController<L> {
    /// Read the live servo state and apply the configured speed.
    ///
    /// Any link failure here is fatal for the whole hand.
    pub fn initialize(
        id: FingerId,
        mut link: L,
        config: FingerConfig,
        timing: MotionTiming,
    ) -> Result<Self, HandError> {
        let span = info_span!("finger", id = id.get());
        let connection = |source: LinkError| HandError::Connection { finger: id, source };

        let (temperature, position, goal, torque) = span.in_scope(|| {
            debug!("Reading servo {} state", link.id());
            let temperature = link.read_temperature().map_err(connection)?;
            let position = link.read_position().map_err(connection)?;
            let goal = link.read_goal_position().map_err(connection)?;
            let torque = link.read_torque_limits().map_err(connection)?;
            link.set_speed(config.speed).map_err(connection)?;
            info!(
                "Initialized at position {} (goal {}, {} C, speed {})",
                position, goal, temperature, config.speed
            );
            Ok::<_, HandError>((temperature, position, goal, torque))
        })?;

        Ok(Self {
            id,
            link,
            config,
            timing,
            initial_position: position,
            current_position: position,
            goal_position: goal,
            temperature,
            torque,
            status: FingerStatus::Ready,
            span,
        })
    }

    pub fn id(&self) -> FingerId {
        self.id
    }

    pub fn config(&self) -> &FingerConfig {
        &self.config
    }

    pub fn status(&self) -> FingerStatus {
        self.status
    }

    pub fn initial_position(&self) -> i32 {
        self.initial_position
    }

    /// Position from the most recent successful read, without touching the
    /// link
    pub fn last_position(&self) -> i32 {
        self.current_position
    }

    pub fn goal_position(&self) -> i32 {
        self.goal_position
    }

    pub fn temperature(&self) -> u8 {
        self.temperature
    }

    pub fn torque_limits(&self) -> TorqueLimits {
        self.torque
    }

    /// Wait for the servo to stop, bounded by the move timeout, then read
    /// its position.
    pub fn current_position(&mut self) -> Settle {
        let deadline = Instant::now() + self.timing.move_timeout;
        loop {
            match self.link.is_moving() {
                Ok(false) => break,
                Ok(true) if Instant::now() >= deadline => return Settle::TimedOut,
                Ok(true) => thread::sleep(self.timing.poll_interval),
                Err(e) => return Settle::Faulted(e),
            }
        }

        match self.link.read_position() {
            Ok(position) => {
                self.current_position = position;
                info!(parent: &self.span, "Current position {}", position);
                Settle::Settled(position)
            }
            Err(e) => Settle::Faulted(e),
        }
    }

    pub fn within_lower_limit(&self, new_position: i32) -> Result<bool, FingerError> {
        let lower = self.config.lower_limit;
        let within = match RotationSign::try_from(self.config.rotation_sign)? {
            RotationSign::Positive => new_position >= lower,
            RotationSign::Negative => new_position <= lower,
        };
        if !within {
            debug!(parent: &self.span, "Cannot exceed start point {}", lower);
        }
        Ok(within)
    }

    /// Move `ticks` encoder counts in `direction`, unless that would pass the
    /// start position.
    pub fn move_delta(&mut self, direction: Direction, ticks: i32) -> MoveOutcome {
        let span = self.span.clone();
        let _entered = span.enter();

        if self.status == FingerStatus::Faulted {
            warn!("{} is faulted, send it to start to recover", self.id);
            return MoveOutcome::Unavailable;
        }

        let from = match self.current_position() {
            Settle::Settled(position) => position,
            Settle::TimedOut => {
                warn!("Still moving towards {}, move dropped", self.goal_position);
                return MoveOutcome::TimedOut {
                    goal: self.goal_position,
                };
            }
            Settle::Faulted(e) => return self.fault(e),
        };

        let rotation = match RotationSign::try_from(self.config.rotation_sign) {
            Ok(rotation) => rotation,
            Err(e) => {
                error!("{} - {}", self.id, e);
                return MoveOutcome::Rejected {
                    position: from,
                    reason: RejectReason::InvalidRotation(self.config.rotation_sign),
                };
            }
        };

        let Some(new_position) = direction
            .value()
            .checked_mul(rotation.value())
            .and_then(|sign| sign.checked_mul(ticks))
            .and_then(|step| from.checked_add(step))
        else {
            error!("{} - step of {} ticks from {} overflows", self.id, ticks, from);
            return MoveOutcome::Rejected {
                position: from,
                reason: RejectReason::StepOutOfRange { ticks },
            };
        };
        if !matches!(self.within_lower_limit(new_position), Ok(true)) {
            info!(
                "Outside limit {} - Move from position {} to position {}",
                self.id, from, new_position
            );
            return MoveOutcome::Rejected {
                position: from,
                reason: RejectReason::LowerLimit {
                    attempted: new_position,
                },
            };
        }

        info!(
            "{} - Moving from position {} to position {}",
            self.id, from, new_position
        );
        if let Err(e) = self.link.set_goal_position(new_position) {
            return self.fault(e);
        }
        self.goal_position = new_position;

        match self.current_position() {
            Settle::Settled(to) => MoveOutcome::Moved { from, to },
            Settle::TimedOut => {
                warn!(
                    "{} did not reach {} within {:?}",
                    self.id, new_position, self.timing.move_timeout
                );
                MoveOutcome::TimedOut { goal: new_position }
            }
            Settle::Faulted(e) => self.fault(e),
        }
    }

    /// Send the finger to its start position and wait the fixed settle time.
    ///
    /// This is also how a faulted finger is recovered.
    pub fn move_to_start(&mut self) -> MoveOutcome {
        let span = self.span.clone();
        let _entered = span.enter();

        let from = match self.link.read_position() {
            Ok(position) => position,
            Err(e) => {
                warn!("Could not read position before homing: {}", e);
                self.current_position
            }
        };
        let start = self.config.lower_limit;
        info!(
            "Moving {} from position {} to start position {}",
            self.id, from, start
        );

        if let Err(e) = self.link.set_goal_position(start) {
            return self.fault(e);
        }
        self.goal_position = start;

        thread::sleep(self.timing.settle);

        match self.link.read_position() {
            Ok(to) => {
                self.current_position = to;
                if self.status == FingerStatus::Faulted {
                    info!("{} recovered", self.id);
                }
                self.status = FingerStatus::Ready;
                MoveOutcome::Moved { from, to }
            }
            Err(e) => self.fault(e),
        }
    }

    pub fn load(&mut self) -> Result<Load, LinkError> {
        self.link.read_load()
    }

    fn fault(&mut self, e: LinkError) -> MoveOutcome {
        error!("{} link failure: {}", self.id, e);
        self.status = FingerStatus::Faulted;
        MoveOutcome::Faulted(e)
    }
}
