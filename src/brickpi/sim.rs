// Simulated BrickPi3
//
// Answers the same SPI messages as the firmware so the whole stack can run
// without hardware (`--simulate`) and under test. Motors advance a little on
// every encoder/status read, which is enough to exercise motion waiting.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::protocol::{
    self, MessageType, MotorPort, SensorPort, SensorState, SensorType, BOARD_NAME,
    DEFAULT_ADDRESS, MANUFACTURER, POWER_FLOAT, REPLY_DATA_INDEX, REPLY_MARKER_INDEX, REPLY_OK,
};
use super::transport::Transport;

/// Largest step a position-controlled motor makes per read, in degrees
const POSITION_STEP_DEG: i32 = 30;

/// What a simulated motor was last told to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMotorMode {
    Float,
    Power(i8),
    Position(i32),
    Dps(i16),
}

#[derive(Debug, Clone, Copy)]
struct SimMotor {
    mode: SimMotorMode,
    position: i32,
    dps: i16,
    power_limit: u8,
    dps_limit: u16,
}

impl Default for SimMotor {
    fn default() -> Self {
        Self {
            mode: SimMotorMode::Float,
            position: 0,
            dps: 0,
            power_limit: 0,
            dps_limit: 0,
        }
    }
}

impl SimMotor {
    /// Advance one simulation step; returns the power reported in status
    fn step(&mut self) -> i8 {
        let (delta, power) = match self.mode {
            SimMotorMode::Float => (0, 0),
            SimMotorMode::Power(p) => (p as i32 / 10, p),
            SimMotorMode::Dps(d) => {
                let d = self.limit_dps(d as i32);
                (d / 10, (d / 10).clamp(-100, 100) as i8)
            }
            SimMotorMode::Position(target) => {
                let mut step = (target as i64 - self.position as i64)
                    .clamp(-POSITION_STEP_DEG as i64, POSITION_STEP_DEG as i64) as i32;
                if self.dps_limit > 0 {
                    let max = (self.dps_limit as i32 / 10).max(1);
                    step = step.clamp(-max, max);
                }
                (step, (step * 3).clamp(-100, 100) as i8)
            }
        };
        self.position = self.position.saturating_add(delta);
        self.dps = (delta * 10).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        power
    }

    fn limit_dps(&self, dps: i32) -> i32 {
        if self.dps_limit == 0 {
            dps
        } else {
            let max = self.dps_limit as i32;
            dps.clamp(-max, max)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimSensor {
    ty: SensorType,
    configuring: bool,
    pressed: bool,
    distance_cm: f32,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self {
            ty: SensorType::None,
            configuring: false,
            pressed: false,
            distance_cm: 255.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    address: u8,
    motors: [SimMotor; 4],
    sensors: [SimSensor; 4],
    led: i8,
    battery_mv: u16,
    transfers: usize,
}

/// Cloneable view into a simulated board's state
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves plain data behind; keep using it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Press or release a touch sensor
    pub fn set_pressed(&self, port: SensorPort, pressed: bool) {
        self.lock().sensors[port.index()].pressed = pressed;
    }

    /// Set the distance an ultrasonic sensor will report
    pub fn set_distance_cm(&self, port: SensorPort, cm: f32) {
        self.lock().sensors[port.index()].distance_cm = cm;
    }

    pub fn set_battery_mv(&self, mv: u16) {
        self.lock().battery_mv = mv;
    }

    pub fn motor_mode(&self, port: MotorPort) -> SimMotorMode {
        self.lock().motors[port.index()].mode
    }

    /// Encoder position as the driver would read it, without advancing the motor
    pub fn motor_position(&self, port: MotorPort) -> i32 {
        self.lock().motors[port.index()].position
    }

    pub fn motor_limits(&self, port: MotorPort) -> (u8, u16) {
        let motor = self.lock().motors[port.index()];
        (motor.power_limit, motor.dps_limit)
    }

    pub fn sensor_type(&self, port: SensorPort) -> SensorType {
        self.lock().sensors[port.index()].ty
    }

    pub fn led(&self) -> i8 {
        self.lock().led
    }

    /// Number of SPI transfers seen so far
    pub fn transfers(&self) -> usize {
        self.lock().transfers
    }
}

/// In-process stand-in for a BrickPi3
pub struct SimulatedBoard {
    handle: SimHandle,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::with_address(DEFAULT_ADDRESS)
    }

    pub fn with_address(address: u8) -> Self {
        let state = SimState {
            address,
            motors: [SimMotor::default(); 4],
            sensors: [SimSensor::default(); 4],
            led: -1,
            battery_mv: 11_100,
            transfers: 0,
        };
        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(state)),
            },
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedBoard {
    fn transfer(&mut self, out: &[u8]) -> io::Result<Vec<u8>> {
        let mut state = self.handle.lock();
        state.transfers += 1;

        let mut reply = vec![0u8; out.len()];
        if out.len() < 2 || out[0] != state.address {
            return Ok(reply);
        }
        let Some(message) = MessageType::from_code(out[1]) else {
            return Ok(reply);
        };

        if let Some(data) = state.apply(message, &out[2..]) {
            if reply.len() > REPLY_MARKER_INDEX {
                reply[REPLY_MARKER_INDEX] = REPLY_OK;
                for (dst, src) in reply.iter_mut().skip(REPLY_DATA_INDEX).zip(data) {
                    *dst = src;
                }
            }
        }
        Ok(reply)
    }
}

impl SimState {
    /// Apply one message; reads return their data bytes
    fn apply(&mut self, message: MessageType, payload: &[u8]) -> Option<Vec<u8>> {
        use MessageType::*;

        let motor = payload.first().copied().and_then(MotorPort::from_mask);
        let sensor = payload.first().copied().and_then(SensorPort::from_mask);
        let be_i32 = |p: &[u8]| -> Option<i32> { Some(i32::from_be_bytes(p.get(1..5)?.try_into().ok()?)) };
        let be_i16 = |p: &[u8]| -> Option<i16> { Some(i16::from_be_bytes(p.get(1..3)?.try_into().ok()?)) };

        match message {
            GetManufacturer => Some(MANUFACTURER.as_bytes().to_vec()),
            GetName => Some(BOARD_NAME.as_bytes().to_vec()),
            GetHardwareVersion => Some(protocol::pack_version(3, 2, 1).to_be_bytes().to_vec()),
            GetFirmwareVersion => Some(protocol::pack_version(1, 4, 8).to_be_bytes().to_vec()),
            GetId => Some((0u8..16).collect()),
            GetVoltage3v3 => Some(3_300u16.to_be_bytes().to_vec()),
            GetVoltage5v => Some(5_000u16.to_be_bytes().to_vec()),
            GetVoltage9v => Some(9_000u16.to_be_bytes().to_vec()),
            GetVoltageVcc => Some(self.battery_mv.to_be_bytes().to_vec()),
            SetLed => {
                self.led = *payload.first()? as i8;
                None
            }
            SetAddress => None,
            SetSensorType => {
                let ty = SensorType::from_code(*payload.get(1)?)?;
                let sensor = &mut self.sensors[sensor?.index()];
                sensor.ty = ty;
                sensor.configuring = ty != SensorType::None;
                None
            }
            GetSensor1 | GetSensor2 | GetSensor3 | GetSensor4 => {
                let index = (message as u8 - GetSensor1 as u8) as usize;
                Some(self.sensors[index].read())
            }
            SetMotorPower => {
                let power = *payload.get(1)? as i8;
                self.motors[motor?.index()].mode = if power == POWER_FLOAT {
                    SimMotorMode::Float
                } else {
                    SimMotorMode::Power(protocol::clamp_power(power))
                };
                None
            }
            SetMotorPosition => {
                self.motors[motor?.index()].mode = SimMotorMode::Position(be_i32(payload)?);
                None
            }
            SetMotorDps => {
                self.motors[motor?.index()].mode = SimMotorMode::Dps(be_i16(payload)?);
                None
            }
            SetMotorLimits => {
                let m = &mut self.motors[motor?.index()];
                m.power_limit = *payload.get(1)?;
                m.dps_limit = u16::from_be_bytes([*payload.get(2)?, *payload.get(3)?]);
                None
            }
            OffsetMotorEncoder => {
                let offset = be_i32(payload)?;
                let m = &mut self.motors[motor?.index()];
                m.position = m.position.saturating_sub(offset);
                if let SimMotorMode::Position(target) = m.mode {
                    m.mode = SimMotorMode::Position(target.saturating_sub(offset));
                }
                None
            }
            SetMotorPositionKp | SetMotorPositionKd | SetMotorDpsKp | SetMotorDpsKd => None,
            GetMotorAEncoder | GetMotorBEncoder | GetMotorCEncoder | GetMotorDEncoder => {
                let index = (message as u8 - GetMotorAEncoder as u8) as usize;
                let m = &mut self.motors[index];
                m.step();
                Some(m.position.to_be_bytes().to_vec())
            }
            GetMotorAStatus | GetMotorBStatus | GetMotorCStatus | GetMotorDStatus => {
                let index = (message as u8 - GetMotorAStatus as u8) as usize;
                let m = &mut self.motors[index];
                let power = m.step();
                let mut data = vec![0u8, power as u8];
                data.extend_from_slice(&m.position.to_be_bytes());
                data.extend_from_slice(&m.dps.to_be_bytes());
                Some(data)
            }
        }
    }
}

impl SimSensor {
    fn read(&mut self) -> Vec<u8> {
        let state = if self.ty == SensorType::None {
            SensorState::NotConfigured
        } else if self.configuring {
            // First read after a type change
            self.configuring = false;
            SensorState::Configuring
        } else {
            SensorState::ValidData
        };

        let mut data = vec![self.ty as u8, state as u8];
        match self.ty {
            SensorType::Touch | SensorType::NxtTouch | SensorType::Ev3Touch => {
                data.push(self.pressed as u8)
            }
            SensorType::NxtUltrasonic => data.push(self.distance_cm.round().clamp(0.0, 255.0) as u8),
            SensorType::Ev3UltrasonicCm => {
                let tenths = (self.distance_cm * 10.0).round().clamp(0.0, 2550.0) as u16;
                data.extend_from_slice(&tenths.to_be_bytes());
            }
            SensorType::Ev3UltrasonicInches => {
                let tenths = (self.distance_cm / 2.54 * 10.0).round().clamp(0.0, 1000.0) as u16;
                data.extend_from_slice(&tenths.to_be_bytes());
            }
            _ => data.extend_from_slice(&[0, 0]),
        }
        data
    }
}
