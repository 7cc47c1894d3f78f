//! Simulated servo for tests and `--simulate` runs.
//!
//! [`SimServo`] reaches its goal instantly unless it has been told to stall,
//! and records the goals it was recently commanded. Clones share state, so a test
//! can keep a probe while the controller owns the link.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ActuatorLink, Load, LinkError, TorqueLimits};

/// Goals kept for inspection; older ones are dropped
pub const GOAL_HISTORY_LIMIT: usize = 256;

#[derive(Debug)]
struct SimState {
    position: i32,
    goal: i32,
    speed: u16,
    temperature: u8,
    torque: TorqueLimits,
    load: Load,
    stalled: bool,
    offline: bool,
    goal_history: VecDeque<i32>,
}

#[derive(Debug, Clone)]
pub struct SimServo {
    id: u8,
    state: Arc<Mutex<SimState>>,
}

impl SimServo {
    pub fn new(id: u8, position: i32) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SimState {
                position,
                goal: position,
                speed: 0,
                temperature: 32,
                torque: TorqueLimits {
                    max: 1023,
                    allowed: 1023,
                },
                load: Load::from_raw(0),
                stalled: false,
                offline: false,
                goal_history: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the recorded state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online(&self) -> Result<MutexGuard<'_, SimState>, LinkError> {
        let state = self.lock();
        if state.offline {
            return Err(LinkError::NoResponse {
                id: self.id,
                reason: "simulated servo is offline".to_string(),
            });
        }
        Ok(state)
    }

    /// Keep reporting "moving" and never reach new goals
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Fail every request while set
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_load(&self, raw: u16) {
        self.lock().load = Load::from_raw(raw);
    }

    pub fn position(&self) -> i32 {
        self.lock().position
    }

    pub fn speed(&self) -> u16 {
        self.lock().speed
    }

    pub fn goal_history(&self) -> Vec<i32> {
        self.lock().goal_history.iter().copied().collect()
    }
}

impl ActuatorLink for SimServo {
    fn id(&self) -> u8 {
        self.id
    }

    fn read_position(&mut self) -> Result<i32, LinkError> {
        Ok(self.online()?.position)
    }

    fn read_goal_position(&mut self) -> Result<i32, LinkError> {
        Ok(self.online()?.goal)
    }

    fn is_moving(&mut self) -> Result<bool, LinkError> {
        let state = self.online()?;
        Ok(state.stalled || state.position != state.goal)
    }

    fn set_goal_position(&mut self, ticks: i32) -> Result<(), LinkError> {
        let mut state = self.online()?;
        state.goal = ticks;
        if state.goal_history.len() == GOAL_HISTORY_LIMIT {
            state.goal_history.pop_front();
        }
        state.goal_history.push_back(ticks);
        if !state.stalled {
            state.position = ticks;
        }
        Ok(())
    }

    fn read_temperature(&mut self) -> Result<u8, LinkError> {
        Ok(self.online()?.temperature)
    }

    fn read_torque_limits(&mut self) -> Result<TorqueLimits, LinkError> {
        Ok(self.online()?.torque)
    }

    fn read_load(&mut self) -> Result<Load, LinkError> {
        Ok(self.online()?.load)
    }

    fn set_speed(&mut self, speed: u16) -> Result<(), LinkError> {
        self.online()?.speed = speed;
        Ok(())
    }
}
