// Keyboard-driven two-motor robot on a BrickPi3
//
// brickpi:   board protocol, driver, transports (SPI, simulated)
// bot:       two-motor/three-sensor facade
// control:   ControlBot base behaviour (stop, wait for motion)
// procedure: keystroke loop
// teleop:    key -> motion mapping

pub mod bot;
pub mod brickpi;
pub mod config;
pub mod control;
pub mod procedure;
pub mod telemetry;
pub mod teleop;

pub use bot::Bot;
pub use control::{BotError, ControlBot, MotionSettings};
pub use procedure::{ControlProcedure, KeySource, ProcedureError};
