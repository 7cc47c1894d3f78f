//! Startup configuration, read once from `hand.toml`.
//!
//! Missing fields fall back to the calibration of the Reflex SF hand this
//! was written for, and a missing file is created with those defaults so
//! operators have something to edit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::controller::CollectorSettings;
use crate::dispatch::{ButtonBindings, DispatcherSettings};
use crate::hand::{FingerConfig, MotionTiming};

const CONFIG_DIR: &str = "openhand";
const CONFIG_FILE: &str = "hand.toml";

// Reflex SF calibration
const LOWER_LIMITS: [i32; 4] = [13900, 16700, 14050, 16384];
const ROTATION_SIGNS: [i8; 4] = [1, -1, 1, -1];
/// Travel from the start position that gets a finger past half way, enough
/// to grasp
const MAX_TRAVEL: i32 = 2300;
const SERVO_SPEED: u16 = 150;
/// One full servo turn; larger steps are a configuration mistake
const MAX_STEP_TICKS: i32 = 4096;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HandConfig {
    pub serial_port: PathBuf,
    pub baud_rate: u32,

    /// Step of the whole-hand gestures
    pub delta_ticks: i32,
    /// Step of the single-finger calibration combos
    pub cal_ticks: i32,

    pub tick_interval_ms: u64,
    pub move_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub settle_ms: u64,

    pub joystick_deadzone: f32,
    pub inverted_axes: Vec<u8>,

    /// tracing level filter, e.g. "info" or "debug"
    pub log_level: String,
    /// Write a timestamped log file here instead of stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    pub bindings: ButtonBindings,
    pub fingers: Vec<FingerConfig>,
}

impl Default for HandConfig {
    fn default() -> Self {
        let fingers = LOWER_LIMITS
            .into_iter()
            .zip(ROTATION_SIGNS)
            .map(|(lower, sign)| FingerConfig::with_travel(lower, MAX_TRAVEL, sign, SERVO_SPEED))
            .collect();

        Self {
            serial_port: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 57600,
            delta_ticks: 200,
            cal_ticks: 100,
            tick_interval_ms: 50,
            move_timeout_ms: 3000,
            poll_interval_ms: 5,
            settle_ms: 5000,
            joystick_deadzone: 0.05,
            inverted_axes: vec![1],
            log_level: "info".to_string(),
            log_dir: None,
            bindings: ButtonBindings::default(),
            fingers,
        }
    }
}

impl HandConfig {
    /// `$CONFIG/openhand/hand.toml`, or the working directory when the
    /// platform has no config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                warn!("No config directory found, using working directory");
                PathBuf::from(".")
            })
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse hand config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            info!("No config at {}, writing defaults", path.display());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
            }
            let content = toml::to_string_pretty(&Self::default())
                .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
            tokio::fs::write(path, content)
                .await
                .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fingers.len() != 4 {
            return Err(eyre!(
                "Hand config needs exactly 4 fingers, found {}",
                self.fingers.len()
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(eyre!("tick_interval_ms must be greater than zero"));
        }
        for (name, ticks) in [("delta_ticks", self.delta_ticks), ("cal_ticks", self.cal_ticks)] {
            if !(1..=MAX_STEP_TICKS).contains(&ticks) {
                return Err(eyre!(
                    "{} must be between 1 and {}, found {}",
                    name,
                    MAX_STEP_TICKS,
                    ticks
                ));
            }
        }
        for (index, finger) in self.fingers.iter().enumerate() {
            if !matches!(finger.rotation_sign, 1 | -1) {
                // Not fatal: that finger refuses to move
                warn!(
                    "Finger{} rotation {} is not -1 or +1, its moves will be rejected",
                    index + 1,
                    finger.rotation_sign
                );
            }
        }
        Ok(())
    }

    pub fn timing(&self) -> MotionTiming {
        MotionTiming {
            move_timeout: Duration::from_millis(self.move_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            cal_ticks: self.cal_ticks,
            bindings: self.bindings.clone(),
        }
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            joystick_deadzone: self.joystick_deadzone,
            inverted_axes: self.inverted_axes.clone(),
        }
    }
}
