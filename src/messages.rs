// Value types shared by the link, the dispatcher, and the zenoh bridge

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::config::TELEMETRY_VALUES;

/// Fields per channel in a telemetry frame
pub const CHANNEL_FIELDS: usize = 6;

/// One of the two independently controlled motor loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChannelId {
    One,
    Two,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::One, ChannelId::Two];

    /// Zero-based slot, used for field offsets and per-channel arrays
    pub fn index(self) -> usize {
        match self {
            ChannelId::One => 0,
            ChannelId::Two => 1,
        }
    }

    /// Number used on the wire ("kp1", "tar2")
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChannelId::One),
            2 => Ok(ChannelId::Two),
            other => Err(format!("unknown channel {}", other)),
        }
    }
}

impl From<ChannelId> for u8 {
    fn from(id: ChannelId) -> Self {
        id.number()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Tunable controller parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamId {
    #[serde(rename = "tar")]
    Target,
    #[serde(rename = "kp")]
    Kp,
    #[serde(rename = "ki")]
    Ki,
    #[serde(rename = "kd")]
    Kd,
}

impl ParamId {
    pub const ALL: [ParamId; 4] = [ParamId::Target, ParamId::Kp, ParamId::Ki, ParamId::Kd];

    /// Identifier the firmware expects in front of the channel number
    pub fn as_str(self) -> &'static str {
        match self {
            ParamId::Target => "tar",
            ParamId::Kp => "kp",
            ParamId::Ki => "ki",
            ParamId::Kd => "kd",
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One channel's share of a telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub setpoint: f64,
    pub position: f64,
    pub output: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// A complete sample from the device: `sp1, pos1, out1, kp1, ki1, kd1, sp2, ...`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    fields: [f64; TELEMETRY_VALUES],
}

impl TelemetryFrame {
    pub fn new(fields: [f64; TELEMETRY_VALUES]) -> Self {
        Self { fields }
    }

    pub fn values(&self) -> &[f64; TELEMETRY_VALUES] {
        &self.fields
    }

    /// Split out a channel by its fixed field offset
    pub fn channel(&self, id: ChannelId) -> ChannelFrame {
        let f = &self.fields[id.index() * CHANNEL_FIELDS..(id.index() + 1) * CHANNEL_FIELDS];
        ChannelFrame {
            setpoint: f[0],
            position: f[1],
            output: f[2],
            kp: f[3],
            ki: f[4],
            kd: f[5],
        }
    }
}

/// Slider movement from the UI -> dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamEvent {
    pub param: ParamId,
    pub channel: ChannelId,
    /// Slider position, 0..=1000
    pub raw: u16,
}

/// A debounced value waiting for (or leaving on) the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandRequest {
    pub param: ParamId,
    pub channel: ChannelId,
    pub value: f64,
    pub due: Instant,
}

impl CommandRequest {
    /// Wire form without the newline, e.g. `kp1=3.1416`
    pub fn to_command_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}={:.4}", self.param, self.channel, self.value)
    }
}

/// Session control from the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkControl {
    Pause,
    Resume,
}

/// Health published alongside snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    Running,
    Paused,
    Failed,
}
