//! Configuration loading for the daemon
//!
//! Resolves the config path, reads the TOML file once at startup and applies
//! command-line overrides on top. The result is immutable afterwards.

use anyhow::{Context, Result};
use pifan_core::{default_config_path, StaticConfig};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "PIFAN_CONFIG";

/// Pick the config path: CLI flag > env var > default
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

/// Load the static configuration
///
/// A missing file is not an error: every setting has a default.
pub async fn load_static_config(path: &Path) -> Result<StaticConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        info!(
            "Configuration file not found at {}. Using defaults.",
            path.display()
        );
        return Ok(StaticConfig::default());
    }

    debug!("Loading configuration from: {}", path.display());

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    StaticConfig::from_toml(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Settings given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Chip for both lines, replacing `pwm.chip` and `tachometer.chip`
    pub chip: Option<PathBuf>,
    pub pwm_pin: Option<u8>,
    pub tach_pin: Option<u8>,
    pub no_tach: bool,
    pub period_ms: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut StaticConfig) {
        if let Some(chip) = &self.chip {
            config.pwm.chip = chip.clone();
            config.tachometer.chip = None;
        }
        if let Some(pin) = self.pwm_pin {
            config.pwm.pin = pin;
        }
        if let Some(pin) = self.tach_pin {
            config.tachometer.pin = pin;
            config.tachometer.enabled = true;
        }
        if self.no_tach {
            config.tachometer.enabled = false;
        }
        if let Some(period_ms) = self.period_ms {
            config.control.period_ms = period_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = load_static_config(&path).await.unwrap();
        assert_eq!(config, StaticConfig::default());
        // Nothing is written back
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[control]\nperiod_ms = 1500\n").unwrap();

        let config = load_static_config(&path).await.unwrap();
        assert_eq!(config.control.period_ms, 1500);
        assert_eq!(config.pwm.pin, 13);
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[control\nperiod_ms = ").unwrap();

        let err = load_static_config(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_cli_path_wins() {
        let path = resolve_config_path(Some(PathBuf::from("/tmp/pifan.toml")));
        assert_eq!(path, PathBuf::from("/tmp/pifan.toml"));
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = StaticConfig::default();
        let overrides = Overrides {
            chip: None,
            pwm_pin: Some(18),
            tach_pin: None,
            no_tach: true,
            period_ms: Some(1000),
        };

        overrides.apply(&mut config);
        assert_eq!(config.pwm.pin, 18);
        assert!(!config.tachometer.enabled);
        assert_eq!(config.control.period_ms, 1000);
    }

    #[test]
    fn test_empty_overrides_change_nothing() {
        let mut config = StaticConfig::default();
        Overrides::default().apply(&mut config);
        assert_eq!(config, StaticConfig::default());
    }

    #[test]
    fn test_chip_override_covers_both_lines() {
        let mut config = StaticConfig::default();
        config.tachometer.chip = Some(PathBuf::from("/dev/gpiochip1"));

        let overrides = Overrides {
            chip: Some(PathBuf::from("/dev/gpiochip4")),
            ..Overrides::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.pwm.chip, PathBuf::from("/dev/gpiochip4"));
        assert_eq!(
            config.tachometer.chip_or(&config.pwm),
            std::path::Path::new("/dev/gpiochip4")
        );
    }
}
