//! Whole-hand control
//!
//! [`HandController`] owns the four [`FingerController`]s and runs the
//! compound gestures on top of them:
//!
//! ```text
//! tighten / loosen  ──► fingers 1, 2, 3 (in order, one move at a time)
//! spread / close    ──► finger 4
//! ```
//!
//! Every move blocks until the finger has settled (or timed out) before the
//! next one starts.

pub mod finger;

pub use finger::{
    Direction, FingerConfig, FingerController, FingerError, FingerId, FingerStatus, MotionTiming,
    MoveOutcome, RejectReason, RotationSign, Settle,
};

use tracing::{info, info_span, warn, Span};

use crate::actuator::{ActuatorLink, LinkError};

/// Errors that abort hand setup
#[derive(Debug, thiserror::Error)]
pub enum HandError {
    /// A servo could not be reached while building the hand
    #[error("Connection to servo failed for {finger}: {source}")]
    Connection {
        finger: FingerId,
        #[source]
        source: LinkError,
    },

    #[error("Expected {expected} fingers, got {links} links and {configs} configurations")]
    FingerCount {
        expected: usize,
        links: usize,
        configs: usize,
    },
}

pub struct HandController<L: ActuatorLink> {
    fingers: Vec<FingerController<L>>,
    delta_ticks: i32,
    span: Span,
}

impl<L: ActuatorLink> HandController<L> {
    /// Initialize all four fingers. Links and configurations are given in
    /// finger order; the first failing finger aborts the whole hand.
    pub fn initialize(
        links: Vec<L>,
        configs: &[FingerConfig],
        timing: MotionTiming,
        delta_ticks: i32,
    ) -> Result<Self, HandError> {
        let expected = FingerId::ALL.len();
        if links.len() != expected || configs.len() != expected {
            return Err(HandError::FingerCount {
                expected,
                links: links.len(),
                configs: configs.len(),
            });
        }

        let fingers = FingerId::ALL
            .into_iter()
            .zip(links)
            .zip(configs)
            .map(|((id, link), config)| {
                FingerController::initialize(id, link, config.clone(), timing)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Hand object created");
        Ok(Self {
            fingers,
            delta_ticks,
            span: info_span!("hand"),
        })
    }

    pub fn finger(&self, id: FingerId) -> &FingerController<L> {
        &self.fingers[id.index()]
    }

    pub fn finger_mut(&mut self, id: FingerId) -> &mut FingerController<L> {
        &mut self.fingers[id.index()]
    }

    pub fn fingers(&self) -> impl Iterator<Item = &FingerController<L>> {
        self.fingers.iter()
    }

    pub fn delta_ticks(&self) -> i32 {
        self.delta_ticks
    }

    /// Dump the calibration of every finger, once at startup
    pub fn log_parameters(&self) {
        let _entered = self.span.enter();
        for finger in &self.fingers {
            let torque = finger.torque_limits();
            let config = finger.config();
            info!("--- {}:", finger.id());
            info!("       Max Torque --- {}", torque.max);
            info!("       Allowable Torque --- {}", torque.allowed);
            info!("       Lower Limit Position --- {}", config.lower_limit);
            info!("       Upper Limit Position --- {}", config.upper_limit);
            info!("       Initial Position {}", finger.initial_position());
        }
    }

    pub fn tighten_fingers(&mut self) -> Vec<(FingerId, MoveOutcome)> {
        self.squeeze(Direction::Close, "Tightening")
    }

    pub fn loosen_fingers(&mut self) -> Vec<(FingerId, MoveOutcome)> {
        self.squeeze(Direction::Open, "Loosening")
    }

    /// Swing fingers 1 and 2 apart
    pub fn spread_pair(&mut self) -> MoveOutcome {
        let ticks = self.delta_ticks;
        self.finger_mut(FingerId::SPREAD)
            .move_delta(Direction::Close, ticks)
    }

    /// Bring fingers 1 and 2 together
    pub fn close_pair(&mut self) -> MoveOutcome {
        let ticks = self.delta_ticks;
        self.finger_mut(FingerId::SPREAD)
            .move_delta(Direction::Open, ticks)
    }

    pub fn finger_delta(&mut self, id: FingerId, direction: Direction, ticks: i32) -> MoveOutcome {
        self.finger_mut(id).move_delta(direction, ticks)
    }

    pub fn finger_to_start(&mut self, id: FingerId) -> MoveOutcome {
        self.finger_mut(id).move_to_start()
    }

    fn squeeze(&mut self, direction: Direction, label: &str) -> Vec<(FingerId, MoveOutcome)> {
        let _entered = self.span.enter();
        let ticks = self.delta_ticks;

        let mut outcomes = Vec::with_capacity(FingerId::GRASPING.len());
        for id in FingerId::GRASPING {
            let finger = &mut self.fingers[id.index()];
            info!("{} - Before {}", id, label);
            log_load(finger);
            let outcome = finger.move_delta(direction, ticks);
            info!("{} - After {}", id, label);
            log_load(finger);
            outcomes.push((id, outcome));
        }
        outcomes
    }
}

fn log_load<L: ActuatorLink>(finger: &mut FingerController<L>) {
    match finger.load() {
        Ok(load) => info!("---> Load: {} Direction: {:?}", load.magnitude, load.direction),
        Err(e) => warn!("{} - load unavailable: {}", finger.id(), e),
    }
}
