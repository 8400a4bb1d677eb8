// Keyboard teleop: W/S drive, A/D spin, space/X stop, R/F power level,
// I/K step one wheel turn, J/L pivot, P status, U sensors, Q quit

use std::ops::ControlFlow;

use crossterm::event::KeyCode;
use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::brickpi::Transport;
use crate::control::{BotError, ControlBot, MotionSettings};

const POWER_LEVELS: [i8; 3] = [20, 40, 70]; // percent
const LEVEL_NAMES: [&str; 3] = ["LOW", "MED", "HIGH"];

// Position moves, in wheel degrees
const STEP_DEG: i32 = 360;
const PIVOT_DEG: i32 = 180;

pub const CONTROLS: &str =
    "Controls: W/S=drive, A/D=spin, space/X=stop, R/F=power, I/K=step, J/L=pivot, P=status, U=sensors, Q=quit";

/// Maps keystrokes to Bot commands
pub struct KeyboardPilot<T: Transport> {
    bot: Bot<T>,
    motion: MotionSettings,
    level: usize,
}

impl<T: Transport> ControlBot for KeyboardPilot<T> {
    type Link = T;

    fn bot(&mut self) -> &mut Bot<T> {
        &mut self.bot
    }

    fn motion_settings(&self) -> MotionSettings {
        self.motion
    }
}

impl<T: Transport> KeyboardPilot<T> {
    pub fn new(bot: Bot<T>, motion: MotionSettings) -> Self {
        Self {
            bot,
            motion,
            level: 0,
        }
    }

    /// Current drive power in percent
    pub fn power(&self) -> i8 {
        POWER_LEVELS[self.level]
    }

    /// Handle one keystroke; `Break` ends the control procedure
    pub fn handle_key(&mut self, key: KeyCode) -> Result<ControlFlow<()>, BotError> {
        let p = self.power();
        match key {
            KeyCode::Char('w') => self.bot.set_power(p, p)?,
            KeyCode::Char('s') => self.bot.set_power(-p, -p)?,
            KeyCode::Char('a') => self.bot.set_power(-p, p)?,
            KeyCode::Char('d') => self.bot.set_power(p, -p)?,

            KeyCode::Char(' ') | KeyCode::Char('x') => self.stop()?,

            KeyCode::Char('r') => {
                self.level = (self.level + 1).min(POWER_LEVELS.len() - 1);
                info!("Power: {} ({}%)", LEVEL_NAMES[self.level], self.power());
            }
            KeyCode::Char('f') => {
                self.level = self.level.saturating_sub(1);
                info!("Power: {} ({}%)", LEVEL_NAMES[self.level], self.power());
            }

            KeyCode::Char('i') => self.step(STEP_DEG, STEP_DEG)?,
            KeyCode::Char('k') => self.step(-STEP_DEG, -STEP_DEG)?,
            KeyCode::Char('j') => self.step(-PIVOT_DEG, PIVOT_DEG)?,
            KeyCode::Char('l') => self.step(PIVOT_DEG, -PIVOT_DEG)?,

            KeyCode::Char('p') => self.log_status()?,
            KeyCode::Char('u') => self.log_sensors(),

            KeyCode::Char('q') | KeyCode::Esc => {
                self.stop()?;
                return Ok(ControlFlow::Break(()));
            }

            other => debug!("Ignoring key {:?}", other),
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Move each wheel by a relative angle and wait for both to arrive
    fn step(&mut self, left_deg: i32, right_deg: i32) -> Result<(), BotError> {
        let left = self.bot.get_left_position()? + left_deg;
        let right = self.bot.get_right_position()? + right_deg;
        info!("Moving to left={}, right={}", left, right);

        self.bot.set_left_position(left)?;
        self.bot.set_right_position(right)?;

        match self.wait_for_movement_completion() {
            Err(BotError::MotionTimeout { elapsed }) => {
                // Blocked wheel; give up on this move but keep driving
                warn!("Move abandoned after {:?}", elapsed);
                self.stop()
            }
            other => other,
        }
    }

    fn log_status(&mut self) -> Result<(), BotError> {
        let status = self.bot.status()?;
        match serde_json::to_string(&status) {
            Ok(json) => info!("Status: {}", json),
            Err(e) => warn!("Failed to encode status: {}", e),
        }
        Ok(())
    }

    fn log_sensors(&mut self) {
        match self.bot.get_distance_cm() {
            Ok(cm) => info!("Distance: {:.1} cm", cm),
            Err(e) => warn!("Ultrasonic read failed: {}", e),
        }
        match (self.bot.get_left_touch(), self.bot.get_right_touch()) {
            (Ok(left), Ok(right)) => info!("Touch: left={}, right={}", left, right),
            (Err(e), _) | (_, Err(e)) => warn!("Touch read failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::brickpi::sim::SimMotorMode;
    use crate::brickpi::{BrickPi3, MotorPort, SensorPort, SimHandle, SimulatedBoard, DEFAULT_ADDRESS};
    use crate::config::BotConfig;
    use crate::procedure::{ControlProcedure, ScriptedKeys};

    fn pilot() -> (KeyboardPilot<SimulatedBoard>, SimHandle) {
        pilot_with(MotionSettings {
            poll_interval: Duration::from_millis(1),
            ..MotionSettings::default()
        })
    }

    fn pilot_with(motion: MotionSettings) -> (KeyboardPilot<SimulatedBoard>, SimHandle) {
        let sim = SimulatedBoard::new();
        let handle = sim.handle();
        let board = BrickPi3::open(sim, DEFAULT_ADDRESS).unwrap();
        let bot = Bot::new(board, &BotConfig::default()).unwrap();
        (KeyboardPilot::new(bot, motion), handle)
    }

    fn key(c: char) -> KeyCode {
        KeyCode::Char(c)
    }

    #[test]
    fn test_drive_keys() {
        let (mut pilot, handle) = pilot();

        pilot.handle_key(key('w')).unwrap();
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(20));
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Power(20));

        pilot.handle_key(key('a')).unwrap();
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(-20));
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Power(20));

        pilot.handle_key(key(' ')).unwrap();
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(0));
    }

    #[test]
    fn test_power_levels_saturate() {
        let (mut pilot, _handle) = pilot();
        for _ in 0..5 {
            pilot.handle_key(key('r')).unwrap();
        }
        assert_eq!(pilot.power(), 70);
        for _ in 0..5 {
            pilot.handle_key(key('f')).unwrap();
        }
        assert_eq!(pilot.power(), 20);
    }

    #[test]
    fn test_step_waits_for_arrival() {
        let (mut pilot, handle) = pilot();
        pilot.handle_key(key('i')).unwrap();
        assert_eq!(handle.motor_position(MotorPort::B), 360);
        assert_eq!(handle.motor_position(MotorPort::C), 360);

        pilot.handle_key(key('l')).unwrap();
        assert_eq!(handle.motor_position(MotorPort::B), 540);
        assert_eq!(handle.motor_position(MotorPort::C), 180);
    }

    #[test]
    fn test_step_timeout_stops_and_continues() {
        // A full turn takes 12 polls in the simulator, far past the timeout
        let (mut pilot, handle) = pilot_with(MotionSettings {
            poll_interval: Duration::from_millis(5),
            timeout: Some(Duration::from_millis(10)),
            ..MotionSettings::default()
        });

        let flow = pilot.handle_key(key('i')).unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(0));
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Power(0));
        assert!(handle.motor_position(MotorPort::B) < 360);
    }

    #[test]
    fn test_quit_stops_and_breaks() {
        let (mut pilot, handle) = pilot();
        pilot.handle_key(key('w')).unwrap();
        let flow = pilot.handle_key(KeyCode::Esc).unwrap();
        assert!(flow.is_break());
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(0));
    }

    #[test]
    fn test_unknown_and_report_keys_continue() {
        let (mut pilot, handle) = pilot();
        handle.set_pressed(SensorPort::S1, true);
        for c in ['z', 'p', 'u', 'p'] {
            assert!(pilot.handle_key(key(c)).unwrap().is_continue());
        }
    }

    #[test]
    fn test_runs_under_control_procedure() {
        let (mut pilot, handle) = pilot();
        {
            let mut procedure = ControlProcedure::new(ScriptedKeys::from_chars("rwq"), |k| pilot.handle_key(k))
                .with_period(Duration::ZERO);
            procedure.start_procedure().unwrap();
        }
        assert_eq!(pilot.power(), 40);
        // `q` stopped the wheels
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Power(0));
    }
}
