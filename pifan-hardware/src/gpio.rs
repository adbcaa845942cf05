//! GPIO character-device backend
//!
//! Opens the chip named by `pwm.chip` (and `tachometer.chip`, if set) through
//! the Linux GPIO uAPI. The fan is driven with software PWM from a dedicated
//! thread; tachometer pulses are falling-edge events read on a second thread
//! and handed to the shared counter.

use gpiocdev::line::{Bias, EdgeDetection, Value};
use gpiocdev::Request;
use pifan_core::config::{PwmConfig, TachometerConfig};
use pifan_core::{FanError, Result, TachometerCounter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::handle::FanHardware;
use crate::pwm::{PwmLine, PwmOutput};
use crate::tach::TachometerLine;

/// Consumer label shown by `gpioinfo`
const CONSUMER: &str = "pifand";

/// Sleep between level refreshes while the duty is 0% or 100%
const STEADY_LEVEL_POLL: Duration = Duration::from_millis(10);

/// How long the tachometer thread blocks before rechecking its stop flag
const EDGE_POLL: Duration = Duration::from_millis(100);

/// High and low times of one PWM cycle
fn split_period(period: Duration, percent: u8) -> (Duration, Duration) {
    let high = period.mul_f64(f64::from(percent.min(100)) / 100.0);
    (high, period.saturating_sub(high))
}

fn chip_label(chip: &Path, offset: u32) -> String {
    format!("{}:{}", chip.display(), offset)
}

/// Software PWM on one output line
pub struct CdevPwmLine {
    chip: PathBuf,
    offset: u32,
    frequency_hz: f64,
    duty: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl CdevPwmLine {
    /// Claim the line as an output, driven low, and start the PWM thread
    pub fn claim(config: &PwmConfig) -> Result<Self> {
        let offset = u32::from(config.pin);
        let label = chip_label(&config.chip, offset);
        debug!("Claiming {} for PWM output", label);

        let request = Request::builder()
            .on_chip(&config.chip)
            .with_consumer(CONSUMER)
            .with_line(offset)
            .as_output(Value::Inactive)
            .request()
            .map_err(|e| {
                error!("Failed to claim {}: {}", label, e);
                FanError::HardwareAcquisitionFailed(format!("PWM output {}: {}", label, e))
            })?;

        let period = Duration::from_secs_f64(1.0 / config.frequency_hz);
        let duty = Arc::new(AtomicU8::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let duty = duty.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("pwm-{}", offset))
                .spawn(move || drive_soft_pwm(&request, offset, period, &duty, &stop))
                .map_err(|e| {
                    FanError::HardwareAcquisitionFailed(format!("PWM thread for {}: {}", label, e))
                })?
        };

        Ok(Self {
            chip: config.chip.clone(),
            offset,
            frequency_hz: config.frequency_hz,
            duty,
            stop,
            worker: Some(worker),
        })
    }

    fn label(&self) -> String {
        chip_label(&self.chip, self.offset)
    }
}

/// PWM thread body; leaves the line low when stopped
fn drive_soft_pwm(
    request: &Request,
    offset: u32,
    period: Duration,
    duty: &AtomicU8,
    stop: &AtomicBool,
) -> std::result::Result<(), String> {
    let set = |value: Value| {
        request
            .set_value(offset, value)
            .map(|_| ())
            .map_err(|e| e.to_string())
    };

    while !stop.load(Ordering::Acquire) {
        match duty.load(Ordering::Acquire) {
            0 => {
                set(Value::Inactive)?;
                thread::sleep(STEADY_LEVEL_POLL);
            }
            100.. => {
                set(Value::Active)?;
                thread::sleep(STEADY_LEVEL_POLL);
            }
            percent => {
                let (high, low) = split_period(period, percent);
                set(Value::Active)?;
                thread::sleep(high);
                set(Value::Inactive)?;
                thread::sleep(low);
            }
        }
    }

    set(Value::Inactive)
}

impl PwmLine for CdevPwmLine {
    fn write_duty(&mut self, percent: u8) -> Result<()> {
        match &self.worker {
            Some(worker) if !worker.is_finished() => {
                self.duty.store(percent, Ordering::Release);
                Ok(())
            }
            _ => Err(FanError::Hardware(format!(
                "{} PWM {}%: output thread stopped",
                self.label(),
                percent
            ))),
        }
    }

    fn release(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FanError::HardwareReleaseFailed(format!("{}: {}", self.label(), e))),
            Err(_) => Err(FanError::HardwareReleaseFailed(format!(
                "{}: PWM thread panicked",
                self.label()
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("{} @ {} Hz", self.label(), self.frequency_hz)
    }
}

impl Drop for CdevPwmLine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Falling-edge events on the fan's sense line
pub struct CdevTachometerLine {
    chip: PathBuf,
    offset: u32,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CdevTachometerLine {
    /// Claim the line with pull-up bias and start feeding `counter`
    pub fn attach(
        chip: &Path,
        config: &TachometerConfig,
        counter: Arc<TachometerCounter>,
    ) -> Result<Self> {
        let offset = u32::from(config.pin);
        let label = chip_label(chip, offset);
        debug!("Claiming {} for tachometer input", label);

        let request = Request::builder()
            .on_chip(chip)
            .with_consumer(CONSUMER)
            .with_line(offset)
            .as_input()
            .with_bias(Bias::PullUp)
            .with_edge_detection(EdgeDetection::FallingEdge)
            .request()
            .map_err(|e| {
                error!("Failed to claim {}: {}", label, e);
                FanError::HardwareAcquisitionFailed(format!("tachometer {}: {}", label, e))
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = stop.clone();
            let line = label.clone();
            thread::Builder::new()
                .name(format!("tach-{}", offset))
                .spawn(move || watch_edges(&request, &line, &counter, &stop))
                .map_err(|e| {
                    FanError::HardwareAcquisitionFailed(format!(
                        "tachometer thread for {}: {}",
                        label, e
                    ))
                })?
        };

        Ok(Self {
            chip: chip.to_path_buf(),
            offset,
            stop,
            worker: Some(worker),
        })
    }
}

/// Tachometer thread body; debounce happens in the counter
fn watch_edges(request: &Request, label: &str, counter: &TachometerCounter, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match request.wait_edge_event(EDGE_POLL) {
            Ok(true) => match request.read_edge_event() {
                Ok(_) => {
                    counter.record_edge();
                }
                Err(e) => {
                    warn!("Tachometer {} stopped: {}", label, e);
                    return;
                }
            },
            Ok(false) => {}
            Err(e) => {
                warn!("Tachometer {} stopped: {}", label, e);
                return;
            }
        }
    }
}

impl TachometerLine for CdevTachometerLine {
    fn detach(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);

        match self.worker.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(FanError::HardwareReleaseFailed(format!(
                "{}: tachometer thread panicked",
                chip_label(&self.chip, self.offset)
            ))),
            _ => Ok(()),
        }
    }

    fn describe(&self) -> String {
        chip_label(&self.chip, self.offset)
    }
}

impl Drop for CdevTachometerLine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Claim the fan's GPIO lines
///
/// The PWM line starts low. When `counter` is given the tachometer line is
/// claimed too, on `tachometer.chip` or else the PWM chip, and starts counting
/// immediately. On any failure every line claimed so far is dropped, which
/// stops its thread and returns it to the kernel.
pub fn acquire(
    pwm: &PwmConfig,
    tach: &TachometerConfig,
    counter: Option<Arc<TachometerCounter>>,
) -> Result<FanHardware> {
    info!("Opening GPIO chip {}...", pwm.chip.display());

    let pwm_line = CdevPwmLine::claim(pwm)?;

    let tach_line = match counter {
        Some(counter) => Some(Box::new(CdevTachometerLine::attach(
            tach.chip_or(pwm),
            tach,
            counter,
        )?) as Box<dyn TachometerLine>),
        None => None,
    };

    let hardware = FanHardware::new(
        PwmOutput::new(Box::new(pwm_line) as Box<dyn PwmLine>),
        tach_line,
    );
    info!("GPIO lines claimed ({})", hardware.describe());
    Ok(hardware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pifan_core::config::StaticConfig;

    #[test]
    fn test_split_period() {
        let period = Duration::from_micros(100);

        assert_eq!(split_period(period, 0), (Duration::ZERO, period));
        assert_eq!(
            split_period(period, 40),
            (Duration::from_micros(40), Duration::from_micros(60))
        );
        assert_eq!(split_period(period, 100), (period, Duration::ZERO));
        assert_eq!(split_period(period, 250), (period, Duration::ZERO));
    }

    #[test]
    fn test_missing_chip_fails_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StaticConfig::default();
        config.pwm.chip = dir.path().join("gpiochip9");

        let err = acquire(&config.pwm, &config.tachometer, None).unwrap_err();
        assert!(matches!(err, FanError::HardwareAcquisitionFailed(_)));
        assert!(err.to_string().contains("gpiochip9"));
    }

    #[test]
    fn test_describe_names_chip_and_line() {
        assert_eq!(chip_label(Path::new("/dev/gpiochip4"), 13), "/dev/gpiochip4:13");
    }
}
