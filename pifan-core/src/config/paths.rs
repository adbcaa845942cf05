//! Default path resolution for configuration files
//!
//! Uses XDG Base Directory specification when available, with sensible fallbacks.

use std::path::PathBuf;

/// Returns the default path for the static configuration file.
///
/// Uses XDG config directory if available:
/// - Linux: `~/.config/pifan/config.toml`
/// - Fallback: `/etc/pifan/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("pifan")
        .join("config.toml")
}

/// Linux thermal zone of the SoC on Raspberry Pi boards.
pub fn default_sensor_path() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}

/// First GPIO character device.
pub fn default_gpiochip_path() -> PathBuf {
    PathBuf::from("/dev/gpiochip0")
}

/// Resolve a `--gpiochip` argument: a bare number names `/dev/gpiochipN`,
/// anything else is taken as a path.
pub fn gpiochip_path(chip: &str) -> PathBuf {
    let chip = chip.trim();
    if !chip.is_empty() && chip.bytes().all(|b| b.is_ascii_digit()) {
        PathBuf::from(format!("/dev/gpiochip{}", chip))
    } else {
        PathBuf::from(chip)
    }
}
