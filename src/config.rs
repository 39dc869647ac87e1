// Defaults, topics, and the immutable link configuration
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::messages::ParamId;

// Rolling history length per channel (samples)
pub const BUFFER_SIZE: usize = 500;

// Quiet period before a slider change is sent to the controller
pub const SEND_DELAY: Duration = Duration::from_millis(500);

// Tolerance band (encoder counts) for the settling-time measurement
pub const SETTLING_THRESHOLD: f64 = 6.0;

// Serial defaults
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const BAUD_RATES: [u32; 5] = [9_600, 19_200, 38_400, 57_600, 115_200];

// Bounded poll for every transport read
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

// Snapshot publish rate for the renderer
pub const RENDER_HZ: u64 = 30;

// Values per telemetry frame (two channels x six fields)
pub const TELEMETRY_VALUES: usize = 12;

// Slider resolution: raw positions run 0..=RAW_MAX
pub const RAW_MAX: u16 = 1000;

// Zenoh topics
pub const TOPIC_CMD_PARAM: &str = "pidlink/cmd/param"; // slider events from the UI
pub const TOPIC_CMD_LINK: &str = "pidlink/cmd/link"; // pause / resume
pub const TOPIC_SNAPSHOT: &str = "pidlink/state/snapshot"; // renderer feed
pub const TOPIC_HEALTH: &str = "pidlink/state/health"; // link health

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid range for {param}: min {min} must be below max {max}")]
    InvalidRange { param: ParamId, min: f64, max: f64 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Engineering-unit range a slider maps onto
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Affine map from a raw slider position (0..=1000) to engineering units.
    /// Positions above RAW_MAX are clamped.
    pub fn scale(&self, raw: u16) -> f64 {
        let raw = raw.min(RAW_MAX) as f64;
        self.min + (self.max - self.min) * raw / RAW_MAX as f64
    }

    /// Inverse of `scale`, truncating toward zero and clamped to the slider travel
    pub fn to_raw(&self, value: f64) -> u16 {
        let span = self.max - self.min;
        if !value.is_finite() || span <= 0.0 {
            return 0;
        }
        let raw = ((value - self.min) / span * RAW_MAX as f64).trunc();
        raw.clamp(0.0, RAW_MAX as f64) as u16
    }
}

/// Ranges for every recognized parameter id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamRanges {
    pub tar: ParamRange,
    pub kp: ParamRange,
    pub ki: ParamRange,
    pub kd: ParamRange,
}

impl Default for ParamRanges {
    fn default() -> Self {
        Self {
            tar: ParamRange::new(-41_720.0, 41_720.0),
            kp: ParamRange::new(0.0, 15.0),
            ki: ParamRange::new(0.0, 40.0),
            kd: ParamRange::new(-1.0, 15.0),
        }
    }
}

impl ParamRanges {
    pub fn get(&self, param: ParamId) -> ParamRange {
        match param {
            ParamId::Target => self.tar,
            ParamId::Kp => self.kp,
            ParamId::Ki => self.ki,
            ParamId::Kd => self.kd,
        }
    }
}

/// Which protocol the device speaks on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Newline-delimited, tab-separated decimal telemetry (serial)
    Text,
    /// 0xA5-framed little-endian int32 packets (BLE bridge)
    Binary,
}

/// Everything a link session needs, fixed for the lifetime of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub wire_format: WireFormat,
    /// int32 values per binary packet, fixed per device profile
    pub binary_values: usize,
    pub buffer_capacity: usize,
    pub send_delay_ms: u64,
    pub read_timeout_ms: u64,
    pub settling_threshold: f64,
    pub ranges: ParamRanges,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
            wire_format: WireFormat::Text,
            binary_values: TELEMETRY_VALUES,
            buffer_capacity: BUFFER_SIZE,
            send_delay_ms: SEND_DELAY.as_millis() as u64,
            read_timeout_ms: READ_TIMEOUT.as_millis() as u64,
            settling_threshold: SETTLING_THRESHOLD,
            ranges: ParamRanges::default(),
        }
    }
}

impl LinkConfig {
    /// Load from a TOML file; missing keys fall back to the defaults above
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path)?;
        let cfg: LinkConfig = toml::from_str(&txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for param in ParamId::ALL {
            let range = self.ranges.get(param);
            if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                return Err(ConfigError::InvalidRange {
                    param,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        if !BAUD_RATES.contains(&self.baud_rate) {
            return Err(ConfigError::InvalidValue {
                field: "baud_rate",
                reason: format!("{} is not one of {:?}", self.baud_rate, BAUD_RATES),
            });
        }
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity", "must be at least 1"));
        }
        if self.send_delay_ms == 0 {
            return Err(invalid("send_delay_ms", "must be positive"));
        }
        if self.read_timeout_ms == 0 {
            return Err(invalid("read_timeout_ms", "must be positive"));
        }
        if !(self.settling_threshold.is_finite() && self.settling_threshold >= 0.0) {
            return Err(invalid(
                "settling_threshold",
                "must be a finite, non-negative number",
            ));
        }
        if self.wire_format == WireFormat::Binary && self.binary_values != TELEMETRY_VALUES {
            return Err(ConfigError::InvalidValue {
                field: "binary_values",
                reason: format!(
                    "telemetry packets carry {} values, got {}",
                    TELEMETRY_VALUES, self.binary_values
                ),
            });
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
