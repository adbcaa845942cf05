//! PiFan daemon
//!
//! Reads the board temperature on a fixed period and drives the case fan
//! through a PWM GPIO line, stepping between duty tiers with hysteresis.
//!
//! Configuration is read once from a TOML file (`--config`, then
//! `$PIFAN_CONFIG`, then the default path). Every setting has a default, so
//! the daemon runs without a file on a Geekwork X715.

mod config;
mod control_loop;
mod exit;
mod hardware;
mod notify;
mod shutdown;

use clap::Parser;
use control_loop::{ControlLoop, LoopSettings};
use exit::{exit_code_for, EXIT_CLEAN, EXIT_CONFIG, EXIT_FAILURE};
use notify::SystemdNotifier;
use pifan_core::config::gpiochip_path;
use pifan_core::{HysteresisController, TachometerCounter};
use pifan_hardware::SysfsThermalZone;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// PiFan fan control daemon
#[derive(Parser, Debug)]
#[command(name = "pifand")]
#[command(version, about = "Temperature-driven PWM fan controller", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run without GPIO, logging duty changes instead
    #[arg(long)]
    mock: bool,

    /// Send READY/STOPPING notifications to systemd
    #[arg(long)]
    systemd: bool,

    /// GPIO chip number or device path (overrides pwm.chip and tachometer.chip)
    #[arg(long, value_name = "CHIP")]
    gpiochip: Option<String>,

    /// GPIO line driving the fan (overrides pwm.pin)
    #[arg(long, value_name = "PIN")]
    gpio: Option<u8>,

    /// GPIO line of the tachometer wire (overrides tachometer.pin)
    #[arg(long, value_name = "PIN", conflicts_with = "no_tach")]
    tach_gpio: Option<u8>,

    /// Do not claim or read the tachometer line
    #[arg(long)]
    no_tach: bool,

    /// Sampling period in milliseconds (overrides control.period_ms)
    #[arg(long, value_name = "MS")]
    period: Option<u64>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            chip: self.gpiochip.as_deref().map(gpiochip_path),
            pwm_pin: self.gpio,
            tach_pin: self.tach_gpio,
            no_tach: self.no_tach,
            period_ms: self.period,
        }
    }
}

/// How long runtime shutdown waits for blocking tasks, such as a sensor read
/// stuck on an unresponsive file, before abandoning them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let code = runtime.block_on(run(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    info!("PiFan daemon stopped (exit code {})", code);
    ExitCode::from(code)
}

async fn run(args: Args) -> u8 {
    info!("PiFan daemon starting...");

    let config_path = config::resolve_config_path(args.config.clone());
    info!("Configuration file: {}", config_path.display());

    // Step 1: Load configuration
    let mut static_config = match config::load_static_config(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            error!(stage = "config", "{:#}", e);
            return EXIT_CONFIG;
        }
    };
    args.overrides().apply(&mut static_config);

    // Step 2: Validate and build the curve
    let curve = match static_config.validate() {
        Ok(curve) => curve,
        Err(e) => {
            error!(stage = "config", "Configuration validation failed: {}", e);
            return exit_code_for(&e);
        }
    };
    let initial = match static_config.initial_level(&curve) {
        Ok(level) => level,
        Err(e) => {
            error!(stage = "config", "{}", e);
            return exit_code_for(&e);
        }
    };
    info!(
        "Configuration validated: {} tiers, period {:?}, starting at '{}'",
        curve.len(),
        static_config.control.period(),
        curve.name(initial)
    );

    if args.print_config {
        return match static_config.to_toml() {
            Ok(toml) => {
                print!("{}", toml);
                EXIT_CLEAN
            }
            Err(e) => {
                error!("Failed to serialize configuration: {}", e);
                EXIT_FAILURE
            }
        };
    }

    // Step 3: Build the loop
    let counter = static_config.tachometer.enabled.then(|| {
        Arc::new(TachometerCounter::new(
            static_config.tachometer.pulses_per_revolution,
            static_config.tachometer.min_edge_interval(),
        ))
    });
    let source = SysfsThermalZone::from_config(&static_config.sensor);
    let controller = HysteresisController::new(curve, initial, std::time::Instant::now());
    let notifier = if args.systemd {
        SystemdNotifier::from_env()
    } else {
        None
    };

    let mut control = ControlLoop::new(
        LoopSettings::from_config(&static_config),
        source,
        controller,
        counter.clone(),
    )
    .with_notifier(notifier);

    // Step 4: Run until a signal or a fatal error
    let cancel = CancellationToken::new();
    let listener = shutdown::spawn_signal_listener(cancel.clone());

    let mock = args.mock;
    let outcome = control
        .run(
            || hardware::acquire(&static_config, mock, counter),
            cancel.clone(),
        )
        .await;

    cancel.cancel();
    if let Err(e) = listener.await {
        error!("Signal listener failed: {}", e);
    }

    let controller = control.controller();
    info!(
        state = %control.state(),
        tier = controller.curve().name(controller.level()),
        rpm = control.last_rpm(),
        released = outcome.released,
        "Control loop finished"
    );

    outcome.exit_code()
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from(["pifand", "--gpio", "18", "--no-tach", "--period", "1500"]);
        let overrides = args.overrides();

        assert_eq!(overrides.pwm_pin, Some(18));
        assert!(overrides.no_tach);
        assert_eq!(overrides.period_ms, Some(1500));
        assert_eq!(overrides.chip, None);
    }

    #[test]
    fn test_gpiochip_flag() {
        let args = Args::parse_from(["pifand", "--gpiochip", "4"]);
        assert_eq!(args.overrides().chip, Some(PathBuf::from("/dev/gpiochip4")));

        let args = Args::parse_from(["pifand", "--gpiochip", "/dev/gpiochip1"]);
        assert_eq!(args.overrides().chip, Some(PathBuf::from("/dev/gpiochip1")));
    }

    #[test]
    fn test_tach_flags_conflict() {
        let result = Args::try_parse_from(["pifand", "--tach-gpio", "16", "--no-tach"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_args_verify() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
