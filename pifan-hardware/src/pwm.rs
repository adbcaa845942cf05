//! PWM output - duty-cycle control of the fan line
//!
//! [`PwmOutput`] enforces the driver contract (range check, idempotent writes,
//! release exactly once) on top of a backend implementing [`PwmLine`].

use pifan_core::{FanError, Result};
use tracing::{debug, warn};

/// Backend for a single PWM-capable output line
///
/// This trait enables testing of `PwmOutput` without real hardware
/// by allowing mock implementations.
pub trait PwmLine: Send {
    /// Drive the line at `percent` duty (already validated to 0-100)
    fn write_duty(&mut self, percent: u8) -> Result<()>;

    /// Stop PWM, leave the line low and free it
    fn release(&mut self) -> Result<()>;

    /// Short description for logs (e.g. "/dev/gpiochip0:13 @ 10000 Hz")
    fn describe(&self) -> String;
}

/// Exclusive owner of the fan's PWM line
///
/// Generic over the line type, allowing real hardware (`CdevPwmLine`)
/// or mock lines for testing.
pub struct PwmOutput<L: PwmLine + ?Sized = dyn PwmLine> {
    line: Box<L>,
    applied: Option<u8>,
    released: bool,
}

impl<L: PwmLine + ?Sized> PwmOutput<L> {
    /// Take ownership of `line`
    pub fn new(line: Box<L>) -> Self {
        Self {
            line,
            applied: None,
            released: false,
        }
    }

    /// Set the duty cycle in percent
    ///
    /// Returns `Ok(true)` if the hardware was written and `Ok(false)` if the
    /// value was already applied. Values above 100 are rejected, not clamped.
    pub fn set_duty(&mut self, percent: u32) -> Result<bool> {
        if percent > 100 {
            return Err(FanError::InvalidDutyValue(percent));
        }

        if self.released {
            return Err(FanError::Hardware(format!(
                "{} has already been released",
                self.line.describe()
            )));
        }

        let percent = percent as u8;
        if self.applied == Some(percent) {
            return Ok(false);
        }

        debug!("Setting {} duty to {}%", self.line.describe(), percent);
        self.line.write_duty(percent)?;
        self.applied = Some(percent);
        Ok(true)
    }

    /// Last duty successfully written, if any
    pub fn duty(&self) -> Option<u8> {
        self.applied
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn describe(&self) -> String {
        self.line.describe()
    }

    /// Drive duty to 0 and free the line
    ///
    /// Only the first call reaches the hardware; later calls return `Ok(())`.
    /// Both steps are attempted even if the first fails.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            debug!("{} already released", self.line.describe());
            return Ok(());
        }
        self.released = true;

        let zeroed = self.line.write_duty(0);
        if zeroed.is_ok() {
            self.applied = Some(0);
        }
        let freed = self.line.release();

        match (zeroed, freed) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                Err(FanError::HardwareReleaseFailed(e.to_string()))
            }
            (Err(zero_err), Err(free_err)) => Err(FanError::HardwareReleaseFailed(format!(
                "{}; {}",
                zero_err, free_err
            ))),
        }
    }
}

impl<L: PwmLine + ?Sized> Drop for PwmOutput<L> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "{} dropped without release, releasing now",
                self.line.describe()
            );
            if let Err(e) = self.release() {
                warn!("Release on drop failed: {}", e);
            }
        }
    }
}
