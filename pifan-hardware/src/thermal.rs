//! Temperature sources
//!
//! The control loop reads through the [`TemperatureSource`] trait; the only
//! production implementation reads a Linux thermal zone file.

use async_trait::async_trait;
use pifan_core::config::SensorConfig;
use pifan_core::{
    parse_temperature, FanError, PlausibleRange, Result, TemperatureReading, TemperatureUnit,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Trait for temperature sensor abstraction
///
/// Implementations do a single read per call and keep no state between calls.
#[async_trait]
pub trait TemperatureSource: Send + Sync {
    /// Read the current temperature
    async fn read(&self) -> Result<TemperatureReading>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// A sysfs thermal zone (or any file holding a single number)
#[derive(Debug, Clone)]
pub struct SysfsThermalZone {
    path: PathBuf,
    unit: TemperatureUnit,
    range: PlausibleRange,
}

impl SysfsThermalZone {
    pub fn new(path: impl Into<PathBuf>, unit: TemperatureUnit, range: PlausibleRange) -> Self {
        Self {
            path: path.into(),
            unit,
            range,
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(config.path.clone(), config.unit, config.range())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TemperatureSource for SysfsThermalZone {
    async fn read(&self) -> Result<TemperatureReading> {
        let bytes = fs::read(&self.path).await.map_err(|e| {
            FanError::SensorUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        let raw = String::from_utf8(bytes).map_err(|_| {
            FanError::SensorUnavailable(format!("{}: content is not text", self.path.display()))
        })?;

        let celsius = parse_temperature(&raw, self.unit, &self.range)?;
        debug!("Read {:.2}°C from {}", celsius, self.path.display());

        Ok(TemperatureReading::new(celsius))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
