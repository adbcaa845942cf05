//! PiFan Core Library
//!
//! Shared types, the hysteresis controller, tachometer math and static
//! configuration for the PiFan fan controller. Hardware I/O lives in the
//! `pifan-hardware` crate; the control loop lives in the `pifand` daemon.

pub mod config;
pub mod curve;
pub mod error;
pub mod hysteresis;
pub mod sensor;
pub mod tach;
pub mod types;

// Re-export commonly used types
pub use config::{default_config_path, StaticConfig};
pub use curve::{FanCurve, Tier};
pub use error::*;
pub use hysteresis::{ControllerState, HysteresisController, Transition};
pub use sensor::{parse_temperature, PlausibleRange, TemperatureUnit};
pub use tach::{pulses_to_rpm, PulseWindowSample, TachometerCounter};
pub use types::*;
