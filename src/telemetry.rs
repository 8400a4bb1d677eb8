// Status snapshot logged by the teleop `p` key

use serde::Serialize;

use crate::brickpi::MotorStatus;

/// One motor as reported by the board
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MotorSnapshot {
    pub flags: u8,
    pub power: i8,
    pub position: i32,
    pub dps: i16,
}

impl From<MotorStatus> for MotorSnapshot {
    fn from(status: MotorStatus) -> Self {
        Self {
            flags: status.flags,
            power: status.power,
            position: status.position,
            dps: status.dps,
        }
    }
}

/// Whole-robot snapshot; sensors that failed to read are `None` (`null` in JSON)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BotStatus {
    pub left: MotorSnapshot,
    pub right: MotorSnapshot,
    pub left_touch: Option<bool>,
    pub right_touch: Option<bool>,
    pub distance_cm: Option<f32>,
    pub battery_v: f32,
}
