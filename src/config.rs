// Timing, ports, board configuration
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::brickpi::{MotorPort, SensorPort, SensorType, DEFAULT_ADDRESS};
use crate::control::MotionSettings;

// Pause after each dispatched keystroke
pub const KEY_PERIOD: Duration = Duration::from_millis(100);

// SPI node the BrickPi3 sits on (Raspberry Pi CE1)
pub const SPI_DEVICE: &str = "/dev/spidev0.1";

// Drive motors
pub const LEFT_MOTOR: MotorPort = MotorPort::B;
pub const RIGHT_MOTOR: MotorPort = MotorPort::C;

// Sensors
pub const LEFT_TOUCH: SensorPort = SensorPort::S1;
pub const RIGHT_TOUCH: SensorPort = SensorPort::S2;
pub const ULTRASONIC: SensorPort = SensorPort::S3;

// How long to wait for freshly configured sensors to report valid data
pub const SENSOR_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Motor port {0:?} assigned to both wheels")]
    MotorConflict(MotorPort),

    #[error("Sensor port {0} assigned to more than one sensor")]
    SensorConflict(SensorPort),
}

/// Which ultrasonic sensor is plugged in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UltrasonicKind {
    #[default]
    Nxt,
    Ev3,
}

impl UltrasonicKind {
    pub fn sensor_type(self) -> SensorType {
        match self {
            UltrasonicKind::Nxt => SensorType::NxtUltrasonic,
            UltrasonicKind::Ev3 => SensorType::Ev3UltrasonicCm,
        }
    }
}

/// Runtime configuration, loadable from a JSON file. Missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    pub spi_device: String,
    pub address: u8,
    pub left_motor: MotorPort,
    pub right_motor: MotorPort,
    pub left_touch: SensorPort,
    pub right_touch: SensorPort,
    pub ultrasonic: SensorPort,
    pub ultrasonic_kind: UltrasonicKind,
    /// Power limit in percent for position/dps control (0 = none)
    pub power_limit: u8,
    /// Speed limit in dps for position/dps control (0 = none)
    pub dps_limit: u16,
    pub key_period_ms: u64,
    pub motion_poll_ms: u64,
    pub motion_settle_polls: u32,
    pub motion_start_polls: u32,
    /// 0 disables the timeout
    pub motion_timeout_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        let motion = MotionSettings::default();
        Self {
            spi_device: SPI_DEVICE.to_string(),
            address: DEFAULT_ADDRESS,
            left_motor: LEFT_MOTOR,
            right_motor: RIGHT_MOTOR,
            left_touch: LEFT_TOUCH,
            right_touch: RIGHT_TOUCH,
            ultrasonic: ULTRASONIC,
            ultrasonic_kind: UltrasonicKind::default(),
            power_limit: 0,
            dps_limit: 0,
            key_period_ms: KEY_PERIOD.as_millis() as u64,
            motion_poll_ms: motion.poll_interval.as_millis() as u64,
            motion_settle_polls: motion.settle_polls,
            motion_start_polls: motion.start_polls,
            motion_timeout_ms: motion.timeout.map_or(0, |t| t.as_millis() as u64),
        }
    }
}

impl BotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Every role needs a port of its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.left_motor == self.right_motor {
            return Err(ConfigError::MotorConflict(self.left_motor));
        }
        let sensors = [self.left_touch, self.right_touch, self.ultrasonic];
        for (i, port) in sensors.iter().enumerate() {
            if sensors[i + 1..].contains(port) {
                return Err(ConfigError::SensorConflict(*port));
            }
        }
        Ok(())
    }

    pub fn key_period(&self) -> Duration {
        Duration::from_millis(self.key_period_ms)
    }

    pub fn motion(&self) -> MotionSettings {
        MotionSettings {
            poll_interval: Duration::from_millis(self.motion_poll_ms),
            settle_polls: self.motion_settle_polls.max(1),
            start_polls: self.motion_start_polls,
            timeout: (self.motion_timeout_ms > 0).then(|| Duration::from_millis(self.motion_timeout_ms)),
            ..MotionSettings::default()
        }
    }
}
