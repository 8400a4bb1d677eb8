// BrickPi3 SPI message protocol
//
// Request format: [address, message_type, payload..., zero padding for the reply]
// Reply format:   [x, x, x, 0xA5, data...] (0xA5 at byte 3 marks a valid reply)
// Multi-byte values are big-endian.

use serde::Deserialize;

/// Default SPI address of a BrickPi3
pub const DEFAULT_ADDRESS: u8 = 1;

/// SPI link settings expected by the firmware
pub const SPI_SPEED_HZ: u32 = 500_000;

/// Marker byte at `REPLY_MARKER_INDEX` of every valid read reply
pub const REPLY_OK: u8 = 0xA5;
pub const REPLY_MARKER_INDEX: usize = 3;
pub const REPLY_DATA_INDEX: usize = 4;

/// Expected identity strings, checked on open
pub const MANUFACTURER: &str = "Dexter Industries";
pub const BOARD_NAME: &str = "BrickPi3";

/// Motor power limits; `POWER_FLOAT` disconnects the output
pub const POWER_MAX: i8 = 100;
pub const POWER_FLOAT: i8 = -128;

/// Message types understood by the firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    GetManufacturer = 1,
    GetName = 2,
    GetHardwareVersion = 3,
    GetFirmwareVersion = 4,
    GetId = 5,
    SetLed = 6,
    GetVoltage3v3 = 7,
    GetVoltage5v = 8,
    GetVoltage9v = 9,
    GetVoltageVcc = 10,
    SetAddress = 11,
    SetSensorType = 12,
    GetSensor1 = 13,
    GetSensor2 = 14,
    GetSensor3 = 15,
    GetSensor4 = 16,
    SetMotorPower = 21,
    SetMotorPosition = 22,
    SetMotorPositionKp = 23,
    SetMotorPositionKd = 24,
    SetMotorDps = 25,
    SetMotorDpsKp = 26,
    SetMotorDpsKd = 27,
    SetMotorLimits = 28,
    OffsetMotorEncoder = 29,
    GetMotorAEncoder = 30,
    GetMotorBEncoder = 31,
    GetMotorCEncoder = 32,
    GetMotorDEncoder = 33,
    GetMotorAStatus = 34,
    GetMotorBStatus = 35,
    GetMotorCStatus = 36,
    GetMotorDStatus = 37,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        use MessageType::*;
        let ty = match code {
            1 => GetManufacturer,
            2 => GetName,
            3 => GetHardwareVersion,
            4 => GetFirmwareVersion,
            5 => GetId,
            6 => SetLed,
            7 => GetVoltage3v3,
            8 => GetVoltage5v,
            9 => GetVoltage9v,
            10 => GetVoltageVcc,
            11 => SetAddress,
            12 => SetSensorType,
            13 => GetSensor1,
            14 => GetSensor2,
            15 => GetSensor3,
            16 => GetSensor4,
            21 => SetMotorPower,
            22 => SetMotorPosition,
            23 => SetMotorPositionKp,
            24 => SetMotorPositionKd,
            25 => SetMotorDps,
            26 => SetMotorDpsKp,
            27 => SetMotorDpsKd,
            28 => SetMotorLimits,
            29 => OffsetMotorEncoder,
            30 => GetMotorAEncoder,
            31 => GetMotorBEncoder,
            32 => GetMotorCEncoder,
            33 => GetMotorDEncoder,
            34 => GetMotorAStatus,
            35 => GetMotorBStatus,
            36 => GetMotorCStatus,
            37 => GetMotorDStatus,
            _ => return None,
        };
        Some(ty)
    }
}

/// Motor output ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum MotorPort {
    A,
    B,
    C,
    D,
}

impl MotorPort {
    pub const ALL: [MotorPort; 4] = [MotorPort::A, MotorPort::B, MotorPort::C, MotorPort::D];

    /// Bit mask sent on the wire
    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    pub fn index(self) -> usize {
        match self {
            MotorPort::A => 0,
            MotorPort::B => 1,
            MotorPort::C => 2,
            MotorPort::D => 3,
        }
    }

    pub fn from_mask(mask: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.mask() == mask)
    }

    pub fn encoder_message(self) -> MessageType {
        match self {
            MotorPort::A => MessageType::GetMotorAEncoder,
            MotorPort::B => MessageType::GetMotorBEncoder,
            MotorPort::C => MessageType::GetMotorCEncoder,
            MotorPort::D => MessageType::GetMotorDEncoder,
        }
    }

    pub fn status_message(self) -> MessageType {
        match self {
            MotorPort::A => MessageType::GetMotorAStatus,
            MotorPort::B => MessageType::GetMotorBStatus,
            MotorPort::C => MessageType::GetMotorCStatus,
            MotorPort::D => MessageType::GetMotorDStatus,
        }
    }
}

/// Sensor input ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum SensorPort {
    #[serde(rename = "1")]
    S1,
    #[serde(rename = "2")]
    S2,
    #[serde(rename = "3")]
    S3,
    #[serde(rename = "4")]
    S4,
}

impl SensorPort {
    pub const ALL: [SensorPort; 4] = [SensorPort::S1, SensorPort::S2, SensorPort::S3, SensorPort::S4];

    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    pub fn index(self) -> usize {
        match self {
            SensorPort::S1 => 0,
            SensorPort::S2 => 1,
            SensorPort::S3 => 2,
            SensorPort::S4 => 3,
        }
    }

    pub fn from_mask(mask: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.mask() == mask)
    }

    pub fn read_message(self) -> MessageType {
        match self {
            SensorPort::S1 => MessageType::GetSensor1,
            SensorPort::S2 => MessageType::GetSensor2,
            SensorPort::S3 => MessageType::GetSensor3,
            SensorPort::S4 => MessageType::GetSensor4,
        }
    }
}

impl std::fmt::Display for SensorPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.index() + 1)
    }
}

/// Sensor types (firmware codes)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    None = 1,
    Touch = 4,
    NxtTouch = 5,
    Ev3Touch = 6,
    NxtLightOn = 7,
    NxtLightOff = 8,
    NxtColorRed = 9,
    NxtColorGreen = 10,
    NxtColorBlue = 11,
    NxtColorOff = 13,
    NxtUltrasonic = 14,
    Ev3GyroAbs = 15,
    Ev3GyroDps = 16,
    Ev3ColorReflected = 18,
    Ev3ColorAmbient = 19,
    Ev3ColorColor = 20,
    Ev3UltrasonicCm = 23,
    Ev3UltrasonicInches = 24,
    Ev3UltrasonicListen = 25,
    Ev3InfraredProximity = 26,
}

impl SensorType {
    pub fn from_code(code: u8) -> Option<Self> {
        use SensorType::*;
        let ty = match code {
            1 => None,
            4 => Touch,
            5 => NxtTouch,
            6 => Ev3Touch,
            7 => NxtLightOn,
            8 => NxtLightOff,
            9 => NxtColorRed,
            10 => NxtColorGreen,
            11 => NxtColorBlue,
            13 => NxtColorOff,
            14 => NxtUltrasonic,
            15 => Ev3GyroAbs,
            16 => Ev3GyroDps,
            18 => Ev3ColorReflected,
            19 => Ev3ColorAmbient,
            20 => Ev3ColorColor,
            23 => Ev3UltrasonicCm,
            24 => Ev3UltrasonicInches,
            25 => Ev3UltrasonicListen,
            26 => Ev3InfraredProximity,
            _ => return Option::None,
        };
        Some(ty)
    }

    /// Number of value bytes following the type/state bytes of a sensor reply
    pub fn value_len(self) -> Option<usize> {
        use SensorType::*;
        match self {
            Touch | NxtTouch | Ev3Touch | NxtUltrasonic | Ev3ColorReflected | Ev3ColorAmbient
            | Ev3ColorColor | Ev3UltrasonicListen | Ev3InfraredProximity => Some(1),
            NxtLightOn | NxtLightOff | NxtColorRed | NxtColorGreen | NxtColorBlue | NxtColorOff
            | Ev3GyroAbs | Ev3GyroDps | Ev3UltrasonicCm | Ev3UltrasonicInches => Some(2),
            None => Option::None,
        }
    }

    /// Two-byte values that are signed on the wire
    pub fn is_signed(self) -> bool {
        matches!(self, SensorType::Ev3GyroAbs | SensorType::Ev3GyroDps)
    }

    /// Whether a reply reporting `reported` satisfies a port configured as `self`
    pub fn accepts(self, reported: SensorType) -> bool {
        self == reported
            || (self == SensorType::Touch
                && matches!(reported, SensorType::NxtTouch | SensorType::Ev3Touch))
    }

    pub fn is_touch(self) -> bool {
        matches!(self, SensorType::Touch | SensorType::NxtTouch | SensorType::Ev3Touch)
    }
}

/// State byte of a sensor reply
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    ValidData = 0,
    NotConfigured = 1,
    Configuring = 2,
    NoData = 3,
    I2cError = 4,
}

impl SensorState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SensorState::ValidData),
            1 => Some(SensorState::NotConfigured),
            2 => Some(SensorState::Configuring),
            3 => Some(SensorState::NoData),
            4 => Some(SensorState::I2cError),
            _ => None,
        }
    }
}

/// Decoded motor status reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorStatus {
    pub flags: u8,
    pub power: i8,
    pub position: i32,
    pub dps: i16,
}

/// Start a request: address, message type and its payload
pub fn request(address: u8, message: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(address);
    out.push(message as u8);
    out.extend_from_slice(payload);
    out
}

/// Read request: two header bytes plus `reply_len` bytes clocked out as zero
pub fn read_request(address: u8, message: MessageType, reply_len: usize) -> Vec<u8> {
    let mut out = request(address, message, &[]);
    out.resize(REPLY_DATA_INDEX + reply_len, 0);
    out
}

/// Clamp a power percentage to the range the firmware accepts
pub fn clamp_power(power: i8) -> i8 {
    if power == POWER_FLOAT {
        power
    } else {
        power.clamp(-POWER_MAX, POWER_MAX)
    }
}

/// Firmware/hardware versions are packed as major*1e6 + minor*1e3 + patch
pub fn format_version(raw: u32) -> String {
    format!("{}.{}.{}", raw / 1_000_000, (raw / 1_000) % 1_000, raw % 1_000)
}

/// Inverse of `format_version`, used by the simulated board
pub fn pack_version(major: u32, minor: u32, patch: u32) -> u32 {
    major * 1_000_000 + minor * 1_000 + patch
}

/// Decode a motor status payload (data bytes after the 0xA5 marker)
pub fn decode_motor_status(data: &[u8]) -> Option<MotorStatus> {
    if data.len() < 8 {
        return None;
    }
    Some(MotorStatus {
        flags: data[0],
        power: data[1] as i8,
        position: i32::from_be_bytes([data[2], data[3], data[4], data[5]]),
        dps: i16::from_be_bytes([data[6], data[7]]),
    })
}

/// Decode a NUL-terminated string payload
pub fn decode_string(data: &[u8]) -> String {
    data.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Decode a sensor value of the given type
pub fn decode_sensor_value(ty: SensorType, data: &[u8]) -> Option<i32> {
    match ty.value_len()? {
        1 => data.first().map(|&b| b as i32),
        2 if data.len() >= 2 => {
            let bytes = [data[0], data[1]];
            if ty.is_signed() {
                Some(i16::from_be_bytes(bytes) as i32)
            } else {
                Some(u16::from_be_bytes(bytes) as i32)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_masks() {
        assert_eq!(MotorPort::A.mask(), 0x01);
        assert_eq!(MotorPort::B.mask(), 0x02);
        assert_eq!(MotorPort::C.mask(), 0x04);
        assert_eq!(MotorPort::D.mask(), 0x08);
        assert_eq!(SensorPort::S3.mask(), 0x04);
        assert_eq!(MotorPort::from_mask(0x04), Some(MotorPort::C));
        assert_eq!(SensorPort::from_mask(0x03), None);
    }

    #[test]
    fn test_read_request_padding() {
        let out = read_request(1, MessageType::GetMotorBEncoder, 4);
        assert_eq!(out, vec![1, 31, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_clamp_power() {
        assert_eq!(clamp_power(120), 100);
        assert_eq!(clamp_power(-101), -100);
        assert_eq!(clamp_power(42), 42);
        // Float sentinel passes through untouched
        assert_eq!(clamp_power(POWER_FLOAT), POWER_FLOAT);
    }

    #[test]
    fn test_version_format() {
        assert_eq!(format_version(1_004_002), "1.4.2");
        assert_eq!(format_version(pack_version(3, 12, 7)), "3.12.7");
    }

    #[test]
    fn test_decode_motor_status() {
        // flags=0, power=-50, encoder=-720, dps=-300
        let mut data = vec![0x00, (-50i8) as u8];
        data.extend_from_slice(&(-720i32).to_be_bytes());
        data.extend_from_slice(&(-300i16).to_be_bytes());

        let status = decode_motor_status(&data).unwrap();
        assert_eq!(status.power, -50);
        assert_eq!(status.position, -720);
        assert_eq!(status.dps, -300);
        assert!(decode_motor_status(&data[..5]).is_none());
    }

    #[test]
    fn test_decode_sensor_values() {
        assert_eq!(decode_sensor_value(SensorType::Touch, &[1]), Some(1));
        assert_eq!(decode_sensor_value(SensorType::Ev3UltrasonicCm, &[0x01, 0x2C]), Some(300));
        assert_eq!(decode_sensor_value(SensorType::Ev3GyroDps, &[0xFF, 0xF6]), Some(-10));
        assert_eq!(decode_sensor_value(SensorType::None, &[0]), None);
    }

    #[test]
    fn test_touch_alias() {
        assert!(SensorType::Touch.accepts(SensorType::Ev3Touch));
        assert!(SensorType::Touch.accepts(SensorType::NxtTouch));
        assert!(!SensorType::NxtTouch.accepts(SensorType::Ev3Touch));
        assert!(!SensorType::NxtUltrasonic.accepts(SensorType::Touch));
    }

    #[test]
    fn test_decode_string_stops_at_nul() {
        let mut data = b"BrickPi3".to_vec();
        data.extend_from_slice(&[0, b'x', b'y']);
        assert_eq!(decode_string(&data), "BrickPi3");
    }
}
