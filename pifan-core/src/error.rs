//! Error types for the PiFan system

use thiserror::Error;

/// Core error type for PiFan operations
#[derive(Error, Debug)]
pub enum FanError {
    /// The temperature interface could not be read (missing, unreadable, timed out)
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// The sensor produced a value that is not a plausible temperature
    #[error("Sensor data invalid: {0}")]
    SensorDataInvalid(String),

    /// Duty cycle outside 0-100
    #[error("Invalid duty value: {0} (must be 0-100)")]
    InvalidDutyValue(u32),

    /// GPIO lines could not be claimed at startup
    #[error("Hardware acquisition failed: {0}")]
    HardwareAcquisitionFailed(String),

    /// GPIO lines could not be driven low or freed at shutdown
    #[error("Hardware release failed: {0}")]
    HardwareReleaseFailed(String),

    /// A claimed line rejected an operation
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Too many sensor failures in a row
    #[error("Sensor failed {attempts} consecutive times (limit {limit}): {last}")]
    SensorFailuresExceeded {
        attempts: u32,
        limit: u32,
        last: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FanError {
    /// Whether the control loop may hold its current level and retry next period.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FanError::SensorUnavailable(_) | FanError::SensorDataInvalid(_)
        )
    }
}

/// Result type alias for PiFan operations
pub type Result<T> = std::result::Result<T, FanError>;
