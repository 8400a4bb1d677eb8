// Two-motor robot facade over the BrickPi3
//
// Names the board's ports by what they do on the robot (left/right drive
// motors, left/right bumpers, ultrasonic rangefinder) so control code never
// deals with port masks.

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::brickpi::{BrickPi3, BrickPiError, MotorPort, MotorStatus, SensorPort, SensorType, Transport};
use crate::config::BotConfig;
use crate::telemetry::{BotStatus, MotorSnapshot};

type Result<T> = std::result::Result<T, BrickPiError>;

const SENSOR_POLL: Duration = Duration::from_millis(20);

/// The robot: two drive motors, two touch sensors and an ultrasonic sensor
pub struct Bot<T: Transport> {
    board: BrickPi3<T>,
    left_motor: MotorPort,
    right_motor: MotorPort,
    left_touch: SensorPort,
    right_touch: SensorPort,
    ultrasonic: SensorPort,
}

impl<T: Transport> Bot<T> {
    /// Take ownership of the board and configure its sensors and motor limits
    pub fn new(board: BrickPi3<T>, config: &BotConfig) -> Result<Self> {
        let mut bot = Self {
            board,
            left_motor: config.left_motor,
            right_motor: config.right_motor,
            left_touch: config.left_touch,
            right_touch: config.right_touch,
            ultrasonic: config.ultrasonic,
        };

        info!(
            "Bot: motors L={:?} R={:?}, touch L={} R={}, ultrasonic {} ({:?})",
            bot.left_motor,
            bot.right_motor,
            bot.left_touch,
            bot.right_touch,
            bot.ultrasonic,
            config.ultrasonic_kind
        );

        bot.board.set_sensor_type(bot.left_touch, SensorType::Touch)?;
        bot.board.set_sensor_type(bot.right_touch, SensorType::Touch)?;
        bot.board
            .set_sensor_type(bot.ultrasonic, config.ultrasonic_kind.sensor_type())?;

        if config.power_limit > 0 || config.dps_limit > 0 {
            bot.set_limits(config.power_limit, config.dps_limit)?;
        }
        bot.reset_encoders()?;

        Ok(bot)
    }

    // === Motors ===

    pub fn set_left_power(&mut self, power: i8) -> Result<()> {
        self.board.set_motor_power(self.left_motor, power)
    }

    pub fn set_right_power(&mut self, power: i8) -> Result<()> {
        self.board.set_motor_power(self.right_motor, power)
    }

    pub fn set_power(&mut self, left: i8, right: i8) -> Result<()> {
        debug!("Power: left={}, right={}", left, right);
        self.set_left_power(left)?;
        self.set_right_power(right)
    }

    /// Drive the left wheel to an absolute encoder position (degrees)
    pub fn set_left_position(&mut self, position: i32) -> Result<()> {
        self.board.set_motor_position(self.left_motor, position)
    }

    pub fn set_right_position(&mut self, position: i32) -> Result<()> {
        self.board.set_motor_position(self.right_motor, position)
    }

    pub fn get_left_position(&mut self) -> Result<i32> {
        self.board.get_motor_encoder(self.left_motor)
    }

    pub fn get_right_position(&mut self) -> Result<i32> {
        self.board.get_motor_encoder(self.right_motor)
    }

    /// Run the left wheel at a target speed (degrees per second)
    pub fn set_left_velocity(&mut self, dps: i16) -> Result<()> {
        self.board.set_motor_dps(self.left_motor, dps)
    }

    pub fn set_right_velocity(&mut self, dps: i16) -> Result<()> {
        self.board.set_motor_dps(self.right_motor, dps)
    }

    pub fn left_status(&mut self) -> Result<MotorStatus> {
        self.board.get_motor_status(self.left_motor)
    }

    pub fn right_status(&mut self) -> Result<MotorStatus> {
        self.board.get_motor_status(self.right_motor)
    }

    /// Zero both encoders at the current wheel positions
    pub fn reset_encoders(&mut self) -> Result<()> {
        self.board.reset_motor_encoder(self.left_motor)?;
        self.board.reset_motor_encoder(self.right_motor)?;
        Ok(())
    }

    /// Power (percent) and speed (dps) limits for position and velocity control
    pub fn set_limits(&mut self, power: u8, dps: u16) -> Result<()> {
        info!("Motor limits: power={}%, dps={}", power, dps);
        self.board.set_motor_limits(self.left_motor, power, dps)?;
        self.board.set_motor_limits(self.right_motor, power, dps)
    }

    // === Sensors ===

    pub fn get_left_touch(&mut self) -> Result<bool> {
        self.board.get_touch(self.left_touch)
    }

    pub fn get_right_touch(&mut self) -> Result<bool> {
        self.board.get_touch(self.right_touch)
    }

    /// Ultrasonic distance in centimetres
    pub fn get_distance_cm(&mut self) -> Result<f32> {
        self.board.get_distance_cm(self.ultrasonic)
    }

    pub fn battery_voltage(&mut self) -> Result<f32> {
        self.board.voltage_battery()
    }

    /// Poll until every sensor reports valid data. Returns false on timeout.
    pub fn wait_for_sensors(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            let ready = self.get_left_touch().is_ok()
                && self.get_right_touch().is_ok()
                && self.get_distance_cm().is_ok();
            if ready {
                debug!("Sensors ready after {:?}", started.elapsed());
                return true;
            }
            if started.elapsed() >= timeout {
                warn!("Sensors not ready after {:?}", timeout);
                return false;
            }
            sleep(SENSOR_POLL);
        }
    }

    /// Snapshot of motors and sensors. Sensor read failures are reported as missing values.
    pub fn status(&mut self) -> Result<BotStatus> {
        let left = self.left_status()?;
        let right = self.right_status()?;
        Ok(BotStatus {
            left: MotorSnapshot::from(left),
            right: MotorSnapshot::from(right),
            left_touch: self.get_left_touch().ok(),
            right_touch: self.get_right_touch().ok(),
            distance_cm: self.get_distance_cm().ok(),
            battery_v: self.battery_voltage()?,
        })
    }

    /// Put the board back in its power-on state: sensors off, motors floating
    pub fn reset(&mut self) -> Result<()> {
        self.board.reset_all()
    }

    pub fn board(&self) -> &BrickPi3<T> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut BrickPi3<T> {
        &mut self.board
    }
}

impl<T: Transport> Drop for Bot<T> {
    fn drop(&mut self) {
        // Never leave the wheels powered when the bot goes away
        if let Err(e) = self.reset() {
            warn!("Failed to reset BrickPi3 on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brickpi::sim::SimMotorMode;
    use crate::brickpi::{SimHandle, SimulatedBoard, DEFAULT_ADDRESS};

    fn sim_bot(config: &BotConfig) -> (Bot<SimulatedBoard>, SimHandle) {
        let sim = SimulatedBoard::new();
        let handle = sim.handle();
        let board = BrickPi3::open(sim, DEFAULT_ADDRESS).unwrap();
        (Bot::new(board, config).unwrap(), handle)
    }

    #[test]
    fn test_new_configures_sensors() {
        let (bot, handle) = sim_bot(&BotConfig::default());
        assert_eq!(handle.sensor_type(SensorPort::S1), SensorType::Touch);
        assert_eq!(handle.sensor_type(SensorPort::S2), SensorType::Touch);
        assert_eq!(handle.sensor_type(SensorPort::S3), SensorType::NxtUltrasonic);
        assert_eq!(bot.board().sensor_type(SensorPort::S3), SensorType::NxtUltrasonic);
    }

    #[test]
    fn test_power_goes_to_configured_ports() {
        let (mut bot, handle) = sim_bot(&BotConfig::default());
        bot.set_power(40, -30).unwrap();
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(40));
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Power(-30));
        assert_eq!(handle.motor_mode(MotorPort::A), SimMotorMode::Float);
    }

    #[test]
    fn test_position_and_velocity_commands() {
        let (mut bot, handle) = sim_bot(&BotConfig::default());
        bot.set_left_position(90).unwrap();
        bot.set_right_velocity(-200).unwrap();
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Position(90));
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Dps(-200));

        // Each encoder read advances the simulated wheel
        assert_eq!(bot.get_left_position().unwrap(), 30);
        assert_eq!(bot.get_right_position().unwrap(), -20);
    }

    #[test]
    fn test_limits_from_config() {
        let config = BotConfig {
            power_limit: 50,
            dps_limit: 400,
            ..BotConfig::default()
        };
        let (_bot, handle) = sim_bot(&config);
        assert_eq!(handle.motor_limits(MotorPort::B), (50, 400));
        assert_eq!(handle.motor_limits(MotorPort::C), (50, 400));
    }

    #[test]
    fn test_sensors_after_startup() {
        let (mut bot, handle) = sim_bot(&BotConfig::default());
        assert!(bot.wait_for_sensors(Duration::from_secs(1)));

        handle.set_pressed(SensorPort::S2, true);
        handle.set_distance_cm(SensorPort::S3, 42.0);
        assert!(!bot.get_left_touch().unwrap());
        assert!(bot.get_right_touch().unwrap());
        assert_eq!(bot.get_distance_cm().unwrap(), 42.0);
    }

    #[test]
    fn test_status_snapshot() {
        let (mut bot, handle) = sim_bot(&BotConfig::default());
        handle.set_battery_mv(9_800);
        bot.wait_for_sensors(Duration::from_secs(1));
        bot.set_power(20, 20).unwrap();

        let status = bot.status().unwrap();
        assert_eq!(status.left.power, 20);
        assert_eq!(status.left.position, 2);
        assert_eq!(status.right.dps, 20);
        assert_eq!(status.left_touch, Some(false));
        assert!((status.battery_v - 9.8).abs() < 1e-4);
    }

    #[test]
    fn test_drop_resets_board() {
        let (mut bot, handle) = sim_bot(&BotConfig::default());
        bot.set_power(60, 60).unwrap();
        drop(bot);
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Float);
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Float);
        assert_eq!(handle.sensor_type(SensorPort::S1), SensorType::None);
    }
}
