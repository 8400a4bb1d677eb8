// BrickPi3 motor/sensor controller
//
// Provides:
// - SPI message encoding for the BrickPi3 firmware
// - Board driver (motors, sensors, voltages, LED)
// - Transports: Linux spidev and an in-process simulated board

mod board;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use board::{BrickPi3, BrickPiError};
pub use protocol::{MotorPort, MotorStatus, SensorPort, SensorType, DEFAULT_ADDRESS};
pub use sim::{SimHandle, SimulatedBoard};
#[cfg(target_os = "linux")]
pub use transport::SpiTransport;
pub use transport::Transport;
