//! Hardware acquisition for the daemon
//!
//! Chooses between the GPIO character-device backend and mock lines.

use pifan_core::{Result, StaticConfig, TachometerCounter};
use pifan_hardware::mock::acquire_mock;
use pifan_hardware::FanHardware;
use std::sync::Arc;

/// Claim the fan lines described by `config`
///
/// `counter` is fed by the tachometer line; pass `None` to leave it unclaimed.
pub(crate) fn acquire(
    config: &StaticConfig,
    mock: bool,
    counter: Option<Arc<TachometerCounter>>,
) -> Result<FanHardware> {
    if mock {
        let tach_pin = counter.map(|_| config.tachometer.pin);
        return Ok(acquire_mock(config.pwm.pin, tach_pin));
    }

    acquire_gpio(config, counter)
}

#[cfg(target_os = "linux")]
fn acquire_gpio(
    config: &StaticConfig,
    counter: Option<Arc<TachometerCounter>>,
) -> Result<FanHardware> {
    pifan_hardware::gpio::acquire(&config.pwm, &config.tachometer, counter)
}

#[cfg(not(target_os = "linux"))]
fn acquire_gpio(
    _config: &StaticConfig,
    _counter: Option<Arc<TachometerCounter>>,
) -> Result<FanHardware> {
    Err(pifan_core::FanError::HardwareAcquisitionFailed(
        "GPIO access requires Linux; use --mock".to_string(),
    ))
}
