//! Mock lines for running without GPIO hardware
//!
//! Used by the daemon's `--mock` mode and by tests. Handles are cheap clones
//! sharing one state, so a test can keep a handle after boxing the line.

use std::sync::{Arc, Mutex, MutexGuard};

use pifan_core::{FanError, Result};
use tracing::info;

use crate::handle::FanHardware;
use crate::pwm::{PwmLine, PwmOutput};
use crate::tach::TachometerLine;

#[derive(Debug, Default)]
struct MockLineState {
    writes: Vec<u8>,
    releases: usize,
    fail_writes: bool,
    fail_release: bool,
}

/// PWM line that records every write
#[derive(Debug, Clone, Default)]
pub struct MockPwmLine {
    pin: u8,
    state: Arc<Mutex<MockLineState>>,
}

impl MockPwmLine {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockLineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Duty values written so far, in order
    pub fn writes(&self) -> Vec<u8> {
        self.state().writes.clone()
    }

    /// Number of times the line was released
    pub fn release_count(&self) -> usize {
        self.state().releases
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Make the release step fail
    pub fn fail_release(&self, fail: bool) {
        self.state().fail_release = fail;
    }
}

impl PwmLine for MockPwmLine {
    fn write_duty(&mut self, percent: u8) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(FanError::Hardware(format!(
                "mock GPIO{} refused duty {}",
                self.pin, percent
            )));
        }
        state.writes.push(percent);
        info!("[mock] GPIO{} duty {}%", self.pin, percent);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut state = self.state();
        state.releases += 1;
        if state.fail_release {
            return Err(FanError::HardwareReleaseFailed(format!(
                "mock GPIO{} could not be freed",
                self.pin
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock GPIO{}", self.pin)
    }
}

/// Tachometer line that never sees edges
#[derive(Debug, Clone, Default)]
pub struct MockTachometerLine {
    pin: u8,
    detaches: Arc<Mutex<usize>>,
}

impl MockTachometerLine {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            detaches: Arc::default(),
        }
    }

    pub fn detach_count(&self) -> usize {
        *self.detaches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TachometerLine for MockTachometerLine {
    fn detach(&mut self) -> Result<()> {
        *self.detaches.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock GPIO{}", self.pin)
    }
}

/// Build a [`FanHardware`] on mock lines
pub fn acquire_mock(pwm_pin: u8, tach_pin: Option<u8>) -> FanHardware {
    info!("Mock mode - no GPIO lines will be claimed");
    let pwm = PwmOutput::new(Box::new(MockPwmLine::new(pwm_pin)) as Box<dyn PwmLine>);
    let tach = tach_pin
        .map(|pin| Box::new(MockTachometerLine::new(pin)) as Box<dyn TachometerLine>);
    FanHardware::new(pwm, tach)
}
