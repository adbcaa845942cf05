//! Configuration types for PiFan
//!
//! [`StaticConfig`] is read once at startup from a TOML file and stays
//! immutable for the process lifetime. It covers the sensor, the PWM and
//! tachometer lines, loop timing and the tier ladder.

mod paths;
mod static_config;

pub use paths::{
    default_config_path, default_gpiochip_path, default_sensor_path, gpiochip_path,
};
pub use static_config::{
    ControlConfig, PwmConfig, SensorConfig, StaticConfig, TachometerConfig,
};
