// Base behaviour shared by everything that drives a Bot
//
// Implementors only say where their Bot lives; stopping and waiting for a
// position move to finish come for free.

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::bot::Bot;
use crate::brickpi::{BrickPiError, Transport};

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Hardware(#[from] BrickPiError),

    #[error("Motors still moving after {elapsed:?}")]
    MotionTimeout { elapsed: Duration },
}

/// How `wait_for_movement_completion` polls the motors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSettings {
    pub poll_interval: Duration,
    /// Consecutive idle polls required before a move counts as finished
    pub settle_polls: u32,
    /// Largest |dps| still considered stopped
    pub idle_dps: i16,
    /// Idle polls tolerated before concluding a move never started
    pub start_polls: u32,
    pub timeout: Option<Duration>,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            settle_polls: 2,
            idle_dps: 0,
            start_polls: 5,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

pub trait ControlBot {
    type Link: Transport;

    fn bot(&mut self) -> &mut Bot<Self::Link>;

    fn motion_settings(&self) -> MotionSettings {
        MotionSettings::default()
    }

    /// Cut power to both wheels
    fn stop(&mut self) -> Result<(), BotError> {
        self.bot().set_power(0, 0)?;
        Ok(())
    }

    /// Block until both wheels have stopped turning
    ///
    /// The firmware may still report 0 dps right after a position command, so
    /// until motion has been seen the wheels must stay idle for `start_polls`
    /// polls, not just `settle_polls`.
    fn wait_for_movement_completion(&mut self) -> Result<(), BotError> {
        let settings = self.motion_settings();
        let started = Instant::now();
        let mut idle_polls = 0;
        let mut moved = false;

        loop {
            let left = self.bot().left_status()?;
            let right = self.bot().right_status()?;

            if left.dps.abs() <= settings.idle_dps && right.dps.abs() <= settings.idle_dps {
                idle_polls += 1;
                let required = if moved {
                    settings.settle_polls
                } else {
                    settings.settle_polls.max(settings.start_polls)
                };
                if idle_polls >= required {
                    debug!(
                        "Movement complete after {:?} (left={}, right={})",
                        started.elapsed(),
                        left.position,
                        right.position
                    );
                    return Ok(());
                }
            } else {
                moved = true;
                idle_polls = 0;
            }

            let elapsed = started.elapsed();
            if settings.timeout.is_some_and(|limit| elapsed >= limit) {
                warn!(
                    "Movement not complete after {:?} (left dps={}, right dps={})",
                    elapsed, left.dps, right.dps
                );
                return Err(BotError::MotionTimeout { elapsed });
            }

            sleep(settings.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::brickpi::protocol::{MessageType, REPLY_MARKER_INDEX, REPLY_OK};
    use crate::brickpi::sim::SimMotorMode;
    use crate::brickpi::{BrickPi3, MotorPort, SimHandle, SimulatedBoard, DEFAULT_ADDRESS};
    use crate::config::BotConfig;

    struct TestBot {
        bot: Bot<SimulatedBoard>,
        settings: MotionSettings,
    }

    impl ControlBot for TestBot {
        type Link = SimulatedBoard;

        fn bot(&mut self) -> &mut Bot<SimulatedBoard> {
            &mut self.bot
        }

        fn motion_settings(&self) -> MotionSettings {
            self.settings
        }
    }

    fn test_bot(timeout: Option<Duration>) -> (TestBot, SimHandle) {
        let sim = SimulatedBoard::new();
        let handle = sim.handle();
        let board = BrickPi3::open(sim, DEFAULT_ADDRESS).unwrap();
        let bot = Bot::new(board, &BotConfig::default()).unwrap();
        let settings = MotionSettings {
            poll_interval: Duration::from_millis(1),
            timeout,
            ..MotionSettings::default()
        };
        (TestBot { bot, settings }, handle)
    }

    #[test]
    fn test_stop_zeroes_power() {
        let (mut tb, handle) = test_bot(None);
        tb.bot().set_power(50, -50).unwrap();
        tb.stop().unwrap();
        assert_eq!(handle.motor_mode(MotorPort::B), SimMotorMode::Power(0));
        assert_eq!(handle.motor_mode(MotorPort::C), SimMotorMode::Power(0));
    }

    #[test]
    fn test_wait_returns_once_positions_reached() {
        let (mut tb, handle) = test_bot(Some(Duration::from_secs(5)));
        tb.bot().set_left_position(360).unwrap();
        tb.bot().set_right_position(-180).unwrap();

        tb.wait_for_movement_completion().unwrap();
        assert_eq!(handle.motor_position(MotorPort::B), 360);
        assert_eq!(handle.motor_position(MotorPort::C), -180);
    }

    #[test]
    fn test_wait_when_already_idle() {
        let (mut tb, handle) = test_bot(Some(Duration::from_secs(1)));
        let before = handle.transfers();
        tb.wait_for_movement_completion().unwrap();
        // Two status reads per poll; with no motion seen it waits out start_polls
        assert_eq!(handle.transfers() - before, 2 * 5);
    }

    /// Answers the first `lag` motor status reads with an idle reply, like
    /// firmware that has not picked up a fresh position command yet
    struct LaggingBoard {
        sim: SimulatedBoard,
        lag: usize,
    }

    impl Transport for LaggingBoard {
        fn transfer(&mut self, out: &[u8]) -> io::Result<Vec<u8>> {
            let status = MessageType::GetMotorAStatus as u8..=MessageType::GetMotorDStatus as u8;
            if self.lag > 0 && out.get(1).is_some_and(|code| status.contains(code)) {
                self.lag -= 1;
                let mut reply = vec![0; out.len()];
                reply[REPLY_MARKER_INDEX] = REPLY_OK;
                return Ok(reply);
            }
            self.sim.transfer(out)
        }
    }

    struct LaggingBot {
        bot: Bot<LaggingBoard>,
    }

    impl ControlBot for LaggingBot {
        type Link = LaggingBoard;

        fn bot(&mut self) -> &mut Bot<LaggingBoard> {
            &mut self.bot
        }

        fn motion_settings(&self) -> MotionSettings {
            MotionSettings {
                poll_interval: Duration::from_millis(1),
                ..MotionSettings::default()
            }
        }
    }

    #[test]
    fn test_wait_does_not_finish_before_motion_starts() {
        let sim = SimulatedBoard::new();
        let handle = sim.handle();
        // Two polls (left + right each) read as stopped before the move shows up
        let link = LaggingBoard { sim, lag: 4 };
        let board = BrickPi3::open(link, DEFAULT_ADDRESS).unwrap();
        let mut lb = LaggingBot {
            bot: Bot::new(board, &BotConfig::default()).unwrap(),
        };

        lb.bot().set_left_position(240).unwrap();
        lb.bot().set_right_position(240).unwrap();

        lb.wait_for_movement_completion().unwrap();
        assert_eq!(handle.motor_position(MotorPort::B), 240);
        assert_eq!(handle.motor_position(MotorPort::C), 240);
    }

    #[test]
    fn test_wait_times_out_while_driving() {
        let (mut tb, _handle) = test_bot(Some(Duration::from_millis(20)));
        tb.bot().set_power(30, 30).unwrap();

        let err = tb.wait_for_movement_completion().unwrap_err();
        assert!(matches!(err, BotError::MotionTimeout { elapsed } if elapsed >= Duration::from_millis(20)));
    }
}
