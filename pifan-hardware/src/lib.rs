//! pifan-hardware
//!
//! Hardware abstraction crate for the PiFan controller: the temperature
//! source, the PWM output contract, the tachometer line and the handle that
//! owns them. Intended to be used by the `pifand` daemon.
//
//! Public API:
//! - `thermal::TemperatureSource` / `thermal::SysfsThermalZone` — sensor reads
//! - `pwm::PwmOutput` — duty-cycle driver contract over a `pwm::PwmLine`
//! - `handle::FanHardware` — exclusive owner of the claimed lines
//! - `gpio::acquire` — claim the lines on a GPIO character device (Linux only)
//! - `mock::acquire_mock` — stand-in lines for running without GPIO

#[cfg(target_os = "linux")]
pub mod gpio;
pub mod handle;
pub mod mock;
pub mod pwm;
pub mod tach;
pub mod thermal;

pub use handle::FanHardware;
pub use pwm::{PwmLine, PwmOutput};
pub use tach::TachometerLine;
pub use thermal::{SysfsThermalZone, TemperatureSource};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_present() {
        let _ = std::any::TypeId::of::<FanHardware>();
        let _ = std::any::TypeId::of::<SysfsThermalZone>();
        let _ = std::any::TypeId::of::<mock::MockPwmLine>();
    }
}
