// BrickPi3 board driver
//
// One method per firmware message. The driver keeps the sensor type of each
// port locally because the reply layout of a sensor read depends on it.

use std::io;

use tracing::{debug, info, trace};

use super::protocol::{
    self, MessageType, MotorPort, MotorStatus, SensorPort, SensorState, SensorType,
    BOARD_NAME, MANUFACTURER, POWER_FLOAT, REPLY_DATA_INDEX, REPLY_MARKER_INDEX, REPLY_OK,
};
use super::transport::Transport;

/// Error types for BrickPi3 communication
#[derive(Debug, thiserror::Error)]
pub enum BrickPiError {
    #[error("SPI transfer failed: {0}")]
    Io(#[from] io::Error),

    #[error("No SPI response to {message:?}")]
    NoResponse { message: MessageType },

    #[error("Short reply to {message:?}: expected {expected} bytes, got {got}")]
    ShortReply {
        message: MessageType,
        expected: usize,
        got: usize,
    },

    #[error("Not a BrickPi3: manufacturer {manufacturer:?}, name {name:?}")]
    WrongDevice { manufacturer: String, name: String },

    #[error("Sensor on {port} is not configured")]
    SensorNotConfigured { port: SensorPort },

    #[error("Invalid data from sensor on {port} (state {state:?})")]
    InvalidSensorData {
        port: SensorPort,
        state: Option<SensorState>,
    },

    #[error("Sensor {ty:?} on {port} cannot be read as {wanted}")]
    UnsupportedSensor {
        port: SensorPort,
        ty: SensorType,
        wanted: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, BrickPiError>;

/// Driver for one BrickPi3 on a transport
pub struct BrickPi3<T: Transport> {
    link: T,
    address: u8,
    sensor_types: [SensorType; 4],
}

impl<T: Transport> BrickPi3<T> {
    /// Connect and verify the board identifies itself as a BrickPi3
    pub fn open(link: T, address: u8) -> Result<Self> {
        let mut board = Self::new_unchecked(link, address);
        board.detect()?;
        Ok(board)
    }

    /// Connect without the identity check
    pub fn new_unchecked(link: T, address: u8) -> Self {
        Self {
            link,
            address,
            sensor_types: [SensorType::None; 4],
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Check manufacturer and board name
    pub fn detect(&mut self) -> Result<()> {
        let manufacturer = self.manufacturer()?;
        let name = self.board_name()?;
        if manufacturer != MANUFACTURER || name != BOARD_NAME {
            return Err(BrickPiError::WrongDevice { manufacturer, name });
        }

        let firmware = self.firmware_version()?;
        info!(
            "Found {} {} at address {} (firmware {})",
            manufacturer, name, self.address, firmware
        );
        Ok(())
    }

    fn transfer(&mut self, message: MessageType, out: &[u8]) -> Result<Vec<u8>> {
        trace!("SPI out: {:02X?}", out);
        let reply = self.link.transfer(out)?;
        if reply.len() < out.len() {
            return Err(BrickPiError::ShortReply {
                message,
                expected: out.len(),
                got: reply.len(),
            });
        }
        Ok(reply)
    }

    /// Fire-and-forget write
    fn send(&mut self, message: MessageType, payload: &[u8]) -> Result<()> {
        let out = protocol::request(self.address, message, payload);
        self.transfer(message, &out)?;
        Ok(())
    }

    /// Read `len` data bytes following the 0xA5 marker
    fn read(&mut self, message: MessageType, len: usize) -> Result<Vec<u8>> {
        let out = protocol::read_request(self.address, message, len);
        let reply = self.transfer(message, &out)?;
        if reply[REPLY_MARKER_INDEX] != REPLY_OK {
            return Err(BrickPiError::NoResponse { message });
        }
        Ok(reply[REPLY_DATA_INDEX..REPLY_DATA_INDEX + len].to_vec())
    }

    fn read_u16(&mut self, message: MessageType) -> Result<u16> {
        let data = self.read(message, 2)?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    fn read_u32(&mut self, message: MessageType) -> Result<u32> {
        let data = self.read(message, 4)?;
        Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }

    fn read_string(&mut self, message: MessageType, len: usize) -> Result<String> {
        let data = self.read(message, len)?;
        Ok(protocol::decode_string(&data))
    }

    // === Board information ===

    pub fn manufacturer(&mut self) -> Result<String> {
        self.read_string(MessageType::GetManufacturer, 20)
    }

    pub fn board_name(&mut self) -> Result<String> {
        self.read_string(MessageType::GetName, 20)
    }

    pub fn hardware_version(&mut self) -> Result<String> {
        let raw = self.read_u32(MessageType::GetHardwareVersion)?;
        Ok(protocol::format_version(raw))
    }

    pub fn firmware_version(&mut self) -> Result<String> {
        let raw = self.read_u32(MessageType::GetFirmwareVersion)?;
        Ok(protocol::format_version(raw))
    }

    /// 128-bit serial number as 32 hex digits
    pub fn id(&mut self) -> Result<String> {
        let data = self.read(MessageType::GetId, 16)?;
        Ok(data.iter().map(|b| format!("{:02X}", b)).collect())
    }

    /// Set the LED brightness (0..=100); -1 hands the LED back to the firmware
    pub fn set_led(&mut self, value: i8) -> Result<()> {
        self.send(MessageType::SetLed, &[value.clamp(-1, 100) as u8])
    }

    pub fn voltage_3v3(&mut self) -> Result<f32> {
        self.read_voltage(MessageType::GetVoltage3v3)
    }

    pub fn voltage_5v(&mut self) -> Result<f32> {
        self.read_voltage(MessageType::GetVoltage5v)
    }

    pub fn voltage_9v(&mut self) -> Result<f32> {
        self.read_voltage(MessageType::GetVoltage9v)
    }

    /// Battery (VCC) voltage
    pub fn voltage_battery(&mut self) -> Result<f32> {
        self.read_voltage(MessageType::GetVoltageVcc)
    }

    fn read_voltage(&mut self, message: MessageType) -> Result<f32> {
        // Millivolts on the wire
        Ok(self.read_u16(message)? as f32 / 1000.0)
    }

    // === Sensors ===

    pub fn set_sensor_type(&mut self, port: SensorPort, ty: SensorType) -> Result<()> {
        debug!("Sensor {} -> {:?}", port, ty);
        self.sensor_types[port.index()] = ty;
        self.send(MessageType::SetSensorType, &[port.mask(), ty as u8])
    }

    pub fn sensor_type(&self, port: SensorPort) -> SensorType {
        self.sensor_types[port.index()]
    }

    /// Read the raw value of a sensor as decoded for its configured type
    pub fn get_sensor_raw(&mut self, port: SensorPort) -> Result<i32> {
        let ty = self.sensor_type(port);
        if ty == SensorType::None {
            return Err(BrickPiError::SensorNotConfigured { port });
        }
        let len = ty.value_len().ok_or(BrickPiError::UnsupportedSensor {
            port,
            ty,
            wanted: "raw value",
        })?;

        // Reply: [reported type, state, value...]
        let data = self.read(port.read_message(), 2 + len)?;
        let reported = SensorType::from_code(data[0]);
        let state = SensorState::from_code(data[1]);
        let type_ok = reported.is_some_and(|r| ty.accepts(r));

        if !type_ok || state != Some(SensorState::ValidData) {
            return Err(BrickPiError::InvalidSensorData { port, state });
        }

        protocol::decode_sensor_value(ty, &data[2..]).ok_or(BrickPiError::UnsupportedSensor {
            port,
            ty,
            wanted: "raw value",
        })
    }

    /// Read a touch sensor (true = pressed)
    pub fn get_touch(&mut self, port: SensorPort) -> Result<bool> {
        let ty = self.sensor_type(port);
        if ty != SensorType::None && !ty.is_touch() {
            return Err(BrickPiError::UnsupportedSensor {
                port,
                ty,
                wanted: "touch",
            });
        }
        Ok(self.get_sensor_raw(port)? != 0)
    }

    /// Read an ultrasonic sensor in centimetres
    pub fn get_distance_cm(&mut self, port: SensorPort) -> Result<f32> {
        let ty = self.sensor_type(port);
        let scale = match ty {
            SensorType::None => return Err(BrickPiError::SensorNotConfigured { port }),
            SensorType::NxtUltrasonic => 1.0,
            // EV3 reports tenths
            SensorType::Ev3UltrasonicCm => 0.1,
            SensorType::Ev3UltrasonicInches => 0.254,
            _ => {
                return Err(BrickPiError::UnsupportedSensor {
                    port,
                    ty,
                    wanted: "distance",
                });
            }
        };
        Ok(self.get_sensor_raw(port)? as f32 * scale)
    }

    // === Motors ===

    /// Set motor power in percent (-100..=100), clamped
    pub fn set_motor_power(&mut self, port: MotorPort, power: i8) -> Result<()> {
        let power = protocol::clamp_power(power);
        self.send(MessageType::SetMotorPower, &[port.mask(), power as u8])
    }

    /// Disconnect the motor output so the wheel coasts
    pub fn float_motor(&mut self, port: MotorPort) -> Result<()> {
        self.send(MessageType::SetMotorPower, &[port.mask(), POWER_FLOAT as u8])
    }

    /// Drive to an absolute encoder position in degrees
    pub fn set_motor_position(&mut self, port: MotorPort, position: i32) -> Result<()> {
        let [b0, b1, b2, b3] = position.to_be_bytes();
        self.send(MessageType::SetMotorPosition, &[port.mask(), b0, b1, b2, b3])
    }

    pub fn set_motor_position_kp(&mut self, port: MotorPort, kp: u8) -> Result<()> {
        self.send(MessageType::SetMotorPositionKp, &[port.mask(), kp])
    }

    pub fn set_motor_position_kd(&mut self, port: MotorPort, kd: u8) -> Result<()> {
        self.send(MessageType::SetMotorPositionKd, &[port.mask(), kd])
    }

    /// Run at a target speed in degrees per second
    pub fn set_motor_dps(&mut self, port: MotorPort, dps: i16) -> Result<()> {
        let [hi, lo] = dps.to_be_bytes();
        self.send(MessageType::SetMotorDps, &[port.mask(), hi, lo])
    }

    /// Limit power (percent) and speed (dps) for position and dps control; 0 = no limit
    pub fn set_motor_limits(&mut self, port: MotorPort, power: u8, dps: u16) -> Result<()> {
        let [hi, lo] = dps.to_be_bytes();
        self.send(MessageType::SetMotorLimits, &[port.mask(), power.min(100), hi, lo])
    }

    /// Shift the encoder origin by `offset` degrees
    pub fn offset_motor_encoder(&mut self, port: MotorPort, offset: i32) -> Result<()> {
        let [b0, b1, b2, b3] = offset.to_be_bytes();
        self.send(MessageType::OffsetMotorEncoder, &[port.mask(), b0, b1, b2, b3])
    }

    /// Encoder position in degrees
    pub fn get_motor_encoder(&mut self, port: MotorPort) -> Result<i32> {
        Ok(self.read_u32(port.encoder_message())? as i32)
    }

    /// Zero the encoder at the current position, returning the position it had
    pub fn reset_motor_encoder(&mut self, port: MotorPort) -> Result<i32> {
        let position = self.get_motor_encoder(port)?;
        self.offset_motor_encoder(port, position)?;
        Ok(position)
    }

    pub fn get_motor_status(&mut self, port: MotorPort) -> Result<MotorStatus> {
        let message = port.status_message();
        let data = self.read(message, 8)?;
        protocol::decode_motor_status(&data).ok_or(BrickPiError::ShortReply {
            message,
            expected: 8,
            got: data.len(),
        })
    }

    /// Unconfigure all sensors, float all motors, clear limits, release the LED
    pub fn reset_all(&mut self) -> Result<()> {
        info!("Resetting BrickPi3");
        for port in SensorPort::ALL {
            self.set_sensor_type(port, SensorType::None)?;
        }
        for port in MotorPort::ALL {
            self.float_motor(port)?;
            self.set_motor_limits(port, 0, 0)?;
        }
        self.set_led(-1)
    }
}
