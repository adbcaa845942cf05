//! Temperature value parsing
//!
//! Sensor backends hand over raw text; this module scales and checks it.

use serde::{Deserialize, Serialize};

use crate::error::{FanError, Result};

/// Unit the sensor reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    /// Thousandths of a degree, as exposed by Linux thermal zones
    #[default]
    Millidegrees,
    /// Whole degrees Celsius
    Degrees,
}

impl TemperatureUnit {
    fn to_celsius(self, raw: f64) -> f64 {
        match self {
            TemperatureUnit::Millidegrees => raw / 1000.0,
            TemperatureUnit::Degrees => raw,
        }
    }
}

/// Physically plausible temperature window, in Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlausibleRange {
    pub min_c: f32,
    pub max_c: f32,
}

impl Default for PlausibleRange {
    fn default() -> Self {
        Self {
            min_c: -40.0,
            max_c: 150.0,
        }
    }
}

impl PlausibleRange {
    pub fn contains(&self, celsius: f32) -> bool {
        celsius >= self.min_c && celsius <= self.max_c
    }
}

/// Parse raw sensor text into Celsius, rounded to two decimals.
///
/// Empty content is `SensorUnavailable`; anything that is not a number, or is
/// outside `range`, is `SensorDataInvalid`.
pub fn parse_temperature(raw: &str, unit: TemperatureUnit, range: &PlausibleRange) -> Result<f32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FanError::SensorUnavailable(
            "sensor returned no data".to_string(),
        ));
    }

    let value: f64 = trimmed.parse().map_err(|e| {
        FanError::SensorDataInvalid(format!("'{}' is not a number: {}", trimmed, e))
    })?;

    let celsius = (unit.to_celsius(value) * 100.0).round() / 100.0;
    let celsius = celsius as f32;

    if !celsius.is_finite() || !range.contains(celsius) {
        return Err(FanError::SensorDataInvalid(format!(
            "{} is outside the plausible range {}..={} °C",
            trimmed, range.min_c, range.max_c
        )));
    }

    Ok(celsius)
}
