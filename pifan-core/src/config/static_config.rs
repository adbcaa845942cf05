//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts. Every field has a
//! default, so an empty file describes a Geekwork X715 on a Raspberry Pi 4.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{default_gpiochip_path, default_sensor_path};
use crate::curve::{default_tiers, FanCurve, Tier};
use crate::error::{FanError, Result};
use crate::sensor::{PlausibleRange, TemperatureUnit};
use crate::tach::{DEFAULT_MIN_EDGE_INTERVAL, DEFAULT_PULSES_PER_REVOLUTION};
use crate::types::DutyLevel;

/// Temperature sensor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// File the temperature is read from
    pub path: PathBuf,
    /// Unit of the raw value
    pub unit: TemperatureUnit,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Lowest plausible reading in Celsius
    pub min_c: f32,
    /// Highest plausible reading in Celsius
    pub max_c: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let range = PlausibleRange::default();
        Self {
            path: default_sensor_path(),
            unit: TemperatureUnit::Millidegrees,
            read_timeout_ms: 1000,
            min_c: range.min_c,
            max_c: range.max_c,
        }
    }
}

impl SensorConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn range(&self) -> PlausibleRange {
        PlausibleRange {
            min_c: self.min_c,
            max_c: self.max_c,
        }
    }
}

/// PWM output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    /// GPIO character device the fan lines live on
    pub chip: PathBuf,
    /// Line offset driving the fan (the BCM number on a Raspberry Pi)
    pub pin: u8,
    /// Software PWM frequency in Hz
    pub frequency_hz: f64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            chip: default_gpiochip_path(),
            pin: 13,
            frequency_hz: 10_000.0,
        }
    }
}

/// Tachometer input configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TachometerConfig {
    /// Whether to claim the sense line at all
    pub enabled: bool,
    /// GPIO character device of the sense line, if not the PWM chip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chip: Option<PathBuf>,
    /// Line offset of the fan's sense wire
    pub pin: u8,
    /// Pulses emitted per revolution
    pub pulses_per_revolution: u32,
    /// Edges closer than this (microseconds) are treated as bounce
    pub min_edge_interval_us: u64,
}

impl Default for TachometerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chip: None,
            pin: 16,
            pulses_per_revolution: DEFAULT_PULSES_PER_REVOLUTION,
            min_edge_interval_us: DEFAULT_MIN_EDGE_INTERVAL.as_micros() as u64,
        }
    }
}

impl TachometerConfig {
    pub fn min_edge_interval(&self) -> Duration {
        Duration::from_micros(self.min_edge_interval_us)
    }

    /// Chip of the sense line, falling back to the PWM chip
    pub fn chip_or<'a>(&'a self, pwm: &'a PwmConfig) -> &'a Path {
        self.chip.as_deref().unwrap_or(&pwm.chip)
    }
}

/// Control loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Sampling period in milliseconds
    pub period_ms: u64,
    /// Consecutive sensor failures tolerated before giving up
    pub max_consecutive_failures: u32,
    /// Tier to start in (defaults to the lowest)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_tier: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_ms: 3000,
            max_consecutive_failures: 3,
            initial_tier: None,
        }
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Static configuration for the PiFan daemon.
///
/// Located at `~/.config/pifan/config.toml` by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub sensor: SensorConfig,
    pub pwm: PwmConfig,
    pub tachometer: TachometerConfig,
    pub control: ControlConfig,
    /// Tier ladder, quietest first
    pub tiers: Vec<Tier>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            sensor: SensorConfig::default(),
            pwm: PwmConfig::default(),
            tachometer: TachometerConfig::default(),
            control: ControlConfig::default(),
            tiers: default_tiers(),
        }
    }
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check every setting and build the fan curve.
    pub fn validate(&self) -> Result<FanCurve> {
        if self.control.period_ms == 0 {
            return Err(FanError::Config(
                "control.period_ms must be greater than 0".to_string(),
            ));
        }

        if self.sensor.read_timeout_ms == 0 {
            return Err(FanError::Config(
                "sensor.read_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !(self.sensor.min_c < self.sensor.max_c) {
            return Err(FanError::Config(format!(
                "sensor.min_c ({}) must be below sensor.max_c ({})",
                self.sensor.min_c, self.sensor.max_c
            )));
        }

        if self.pwm.chip.as_os_str().is_empty() {
            return Err(FanError::Config("pwm.chip must name a GPIO device".to_string()));
        }

        if !(self.pwm.frequency_hz.is_finite() && self.pwm.frequency_hz > 0.0) {
            return Err(FanError::Config(format!(
                "pwm.frequency_hz must be positive, got {}",
                self.pwm.frequency_hz
            )));
        }

        if self.tachometer.enabled {
            if self.tachometer.pulses_per_revolution == 0 {
                return Err(FanError::Config(
                    "tachometer.pulses_per_revolution must be greater than 0".to_string(),
                ));
            }
            let same_chip = self.tachometer.chip_or(&self.pwm) == self.pwm.chip.as_path();
            if same_chip && self.tachometer.pin == self.pwm.pin {
                return Err(FanError::Config(format!(
                    "tachometer.pin and pwm.pin are both line {} of {}",
                    self.pwm.pin,
                    self.pwm.chip.display()
                )));
            }
        }

        let curve = FanCurve::new(self.tiers.clone())?;
        self.initial_level(&curve)?;
        Ok(curve)
    }

    /// Level the controller starts at on `curve`.
    pub fn initial_level(&self, curve: &FanCurve) -> Result<DutyLevel> {
        match &self.control.initial_tier {
            None => Ok(curve.lowest()),
            Some(name) => curve.level_named(name).ok_or_else(|| {
                FanError::Config(format!("control.initial_tier '{}' is not a tier", name))
            }),
        }
    }
}
