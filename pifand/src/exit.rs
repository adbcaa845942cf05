//! Process exit codes
//!
//! Each fatal category gets its own code so a supervisor (or a human reading
//! `systemctl status`) can tell which stage failed.

use pifan_core::FanError;

/// Clean shutdown after a termination signal
pub const EXIT_CLEAN: u8 = 0;
/// Anything not covered below
pub const EXIT_FAILURE: u8 = 1;
/// Configuration could not be loaded or validated
pub const EXIT_CONFIG: u8 = 2;
/// GPIO lines could not be claimed
pub const EXIT_ACQUISITION: u8 = 3;
/// The sensor kept failing past the configured bound
pub const EXIT_SENSOR: u8 = 4;
/// A duty value outside 0-100 reached the driver
pub const EXIT_DUTY: u8 = 5;
/// Shutdown was otherwise clean but the lines could not be released
pub const EXIT_RELEASE: u8 = 6;

/// Exit code for a fatal error
pub fn exit_code_for(err: &FanError) -> u8 {
    match err {
        FanError::Config(_) => EXIT_CONFIG,
        FanError::HardwareAcquisitionFailed(_) => EXIT_ACQUISITION,
        FanError::SensorFailuresExceeded { .. }
        | FanError::SensorUnavailable(_)
        | FanError::SensorDataInvalid(_) => EXIT_SENSOR,
        FanError::InvalidDutyValue(_) => EXIT_DUTY,
        FanError::HardwareReleaseFailed(_) => EXIT_RELEASE,
        FanError::Hardware(_) => EXIT_FAILURE,
    }
}

/// Stage name used in fatal diagnostics
pub fn stage_for(err: &FanError) -> &'static str {
    match err {
        FanError::Config(_) => "config",
        FanError::HardwareAcquisitionFailed(_) => "acquisition",
        FanError::SensorFailuresExceeded { .. }
        | FanError::SensorUnavailable(_)
        | FanError::SensorDataInvalid(_) => "sensor",
        FanError::InvalidDutyValue(_) | FanError::Hardware(_) => "duty",
        FanError::HardwareReleaseFailed(_) => "release",
    }
}
