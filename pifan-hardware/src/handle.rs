//! Hardware handle - the lines claimed for one fan
//!
//! A [`FanHardware`] is acquired once at startup, owned by the control loop,
//! and released exactly once on the way out.

use pifan_core::{FanError, Result};
use tracing::{debug, info, warn};

use crate::pwm::{PwmLine, PwmOutput};
use crate::tach::TachometerLine;

/// Exclusive ownership of the PWM line and the optional tachometer line
pub struct FanHardware {
    pwm: PwmOutput<dyn PwmLine>,
    tach: Option<Box<dyn TachometerLine>>,
    released: bool,
}

impl std::fmt::Debug for FanHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanHardware")
            .field("duty", &self.pwm.duty())
            .field("has_tachometer", &self.tach.is_some())
            .field("released", &self.released)
            .finish()
    }
}

impl FanHardware {
    pub fn new(pwm: PwmOutput<dyn PwmLine>, tach: Option<Box<dyn TachometerLine>>) -> Self {
        Self {
            pwm,
            tach,
            released: false,
        }
    }

    /// Set fan duty, see [`PwmOutput::set_duty`]
    pub fn set_duty(&mut self, percent: u8) -> Result<bool> {
        self.pwm.set_duty(u32::from(percent))
    }

    /// Last duty applied to the PWM line
    pub fn duty(&self) -> Option<u8> {
        self.pwm.duty()
    }

    pub fn has_tachometer(&self) -> bool {
        self.tach.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn describe(&self) -> String {
        match &self.tach {
            Some(tach) => format!("pwm={}, tach={}", self.pwm.describe(), tach.describe()),
            None => format!("pwm={}, no tachometer", self.pwm.describe()),
        }
    }

    /// Detach the tachometer, zero and free the PWM line
    ///
    /// Every step runs even if an earlier one fails; the first call does the
    /// work and later calls are no-ops.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            debug!("Hardware already released");
            return Ok(());
        }
        self.released = true;

        let mut failures = Vec::new();

        if let Some(tach) = self.tach.as_mut() {
            if let Err(e) = tach.detach() {
                warn!("Failed to detach {}: {}", tach.describe(), e);
                failures.push(e.to_string());
            }
        }

        if let Err(e) = self.pwm.release() {
            warn!("Failed to release {}: {}", self.pwm.describe(), e);
            failures.push(e.to_string());
        }

        if failures.is_empty() {
            info!("Hardware released ({})", self.describe());
            Ok(())
        } else {
            Err(FanError::HardwareReleaseFailed(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPwmLine, MockTachometerLine};

    fn create_mock_hardware(
        with_tach: bool,
    ) -> (FanHardware, MockPwmLine, Option<MockTachometerLine>) {
        let line = MockPwmLine::new(13);
        let tach = with_tach.then(|| MockTachometerLine::new(16));
        let hardware = FanHardware::new(
            PwmOutput::new(Box::new(line.clone()) as Box<dyn PwmLine>),
            tach.clone()
                .map(|t| Box::new(t) as Box<dyn TachometerLine>),
        );
        (hardware, line, tach)
    }

    #[test]
    fn test_release_exactly_once() {
        let (mut hardware, line, tach) = create_mock_hardware(true);
        hardware.set_duty(75).unwrap();

        hardware.release().unwrap();
        hardware.release().unwrap();
        drop(hardware);

        assert_eq!(line.writes(), vec![75, 0]);
        assert_eq!(line.release_count(), 1);
        assert_eq!(tach.unwrap().detach_count(), 1);
    }

    #[test]
    fn test_release_failure_still_completes() {
        let (mut hardware, line, _) = create_mock_hardware(false);
        line.fail_release(true);

        let result = hardware.release();
        assert!(matches!(result, Err(FanError::HardwareReleaseFailed(_))));
        assert!(hardware.is_released());
        assert_eq!(line.writes(), vec![0]);
    }

    #[test]
    fn test_describe() {
        let (hardware, _, _) = create_mock_hardware(false);
        assert!(!hardware.has_tachometer());
        assert_eq!(hardware.describe(), "pwm=mock GPIO13, no tachometer");
    }
}
