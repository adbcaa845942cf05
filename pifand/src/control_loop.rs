//! The periodic control loop
//!
//! Owns the fan hardware for its whole life: acquires it while `Starting`,
//! samples the sensor and drives the PWM line while `Running`, and releases
//! the lines exactly once while `Stopping`.

use pifan_core::{
    FanError, HysteresisController, StaticConfig, TachometerCounter, TemperatureReading,
};
use pifan_hardware::{FanHardware, TemperatureSource};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exit::{exit_code_for, stage_for, EXIT_CLEAN};
use crate::notify::SystemdNotifier;
use crate::shutdown;

/// Lifecycle state of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Starting => "starting",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Timing and failure tolerance for the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub period: Duration,
    pub read_timeout: Duration,
    pub max_consecutive_failures: u32,
}

impl LoopSettings {
    pub fn from_config(config: &StaticConfig) -> Self {
        Self {
            period: config.control.period(),
            read_timeout: config.sensor.read_timeout(),
            max_consecutive_failures: config.control.max_consecutive_failures,
        }
    }
}

/// Why the loop left `Running`
#[derive(Debug)]
pub enum StopReason {
    /// The cancellation token fired
    Signal,
    /// An error the loop cannot continue past
    Fatal(FanError),
}

/// Result of one full run, from `Starting` to `Stopped`
#[derive(Debug)]
pub struct LoopOutcome {
    pub reason: StopReason,
    pub release_error: Option<FanError>,
    /// Whether hardware was acquired and then released
    pub released: bool,
}

impl LoopOutcome {
    /// Process exit code for this outcome
    ///
    /// A fatal error wins over a release failure; a release failure turns an
    /// otherwise clean stop into a failure.
    pub fn exit_code(&self) -> u8 {
        match (&self.reason, &self.release_error) {
            (StopReason::Fatal(e), _) => exit_code_for(e),
            (StopReason::Signal, Some(e)) => exit_code_for(e),
            (StopReason::Signal, None) => EXIT_CLEAN,
        }
    }
}

pub struct ControlLoop<S: TemperatureSource> {
    settings: LoopSettings,
    source: S,
    controller: HysteresisController,
    tach: Option<Arc<TachometerCounter>>,
    notifier: Option<SystemdNotifier>,
    state: LoopState,
    last_rpm: Option<f64>,
}

impl<S: TemperatureSource> ControlLoop<S> {
    pub fn new(
        settings: LoopSettings,
        source: S,
        controller: HysteresisController,
        tach: Option<Arc<TachometerCounter>>,
    ) -> Self {
        Self {
            settings,
            source,
            controller,
            tach,
            notifier: None,
            state: LoopState::Starting,
            last_rpm: None,
        }
    }

    /// Send systemd readiness notifications through `notifier`
    pub fn with_notifier(mut self, notifier: Option<SystemdNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn controller(&self) -> &HysteresisController {
        &self.controller
    }

    /// Fan speed measured over the last complete tachometer window
    pub fn last_rpm(&self) -> Option<f64> {
        self.last_rpm
    }

    fn enter(&mut self, state: LoopState) {
        debug!("Control loop {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run the loop until `cancel` fires or a fatal error occurs
    ///
    /// `acquire` is called once. When it fails nothing is held and nothing
    /// is released; otherwise the hardware is released exactly once before
    /// this returns.
    pub async fn run<A>(&mut self, acquire: A, cancel: CancellationToken) -> LoopOutcome
    where
        A: FnOnce() -> pifan_core::Result<FanHardware>,
    {
        self.enter(LoopState::Starting);
        info!("Starting control loop (sensor {})", self.source.describe());

        let mut hardware = match acquire() {
            Ok(hardware) => hardware,
            Err(e) => {
                let e = match e {
                    FanError::HardwareAcquisitionFailed(_) => e,
                    other => FanError::HardwareAcquisitionFailed(other.to_string()),
                };
                error!(stage = "acquisition", "Failed to acquire fan hardware: {}", e);
                self.enter(LoopState::Stopped);
                return LoopOutcome {
                    reason: StopReason::Fatal(e),
                    release_error: None,
                    released: false,
                };
            }
        };

        let reason = self.drive(&mut hardware, &cancel).await;
        if let StopReason::Fatal(e) = &reason {
            error!(stage = stage_for(e), "Control loop stopped: {}", e);
        }

        self.enter(LoopState::Stopping);
        if let Some(notifier) = &self.notifier {
            notifier.stopping();
        }
        let release_error = shutdown::release_hardware(&mut hardware);

        self.enter(LoopState::Stopped);
        LoopOutcome {
            reason,
            release_error,
            released: hardware.is_released(),
        }
    }

    async fn drive(
        &mut self,
        hardware: &mut FanHardware,
        cancel: &CancellationToken,
    ) -> StopReason {
        let initial = self.controller.duty();
        if let Err(e) = hardware.set_duty(initial) {
            return StopReason::Fatal(e);
        }
        info!(
            tier = self.controller.curve().name(self.controller.level()),
            duty = initial,
            "Fan hardware ready ({})",
            hardware.describe()
        );

        if let Some(tach) = &self.tach {
            tach.begin_window();
        }
        // The first tick fires at once, so the first measured window starts there
        let mut window_start: Option<Instant> = None;

        let mut ticker = time::interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.enter(LoopState::Running);
        if let Some(notifier) = &self.notifier {
            notifier.ready();
        }

        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Signal,
                _ = ticker.tick() => {}
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Signal,
                result = time::timeout(self.settings.read_timeout, self.source.read()) => result,
            };

            let reading = match read {
                Ok(result) => result,
                Err(_) => Err(FanError::SensorUnavailable(format!(
                    "{} did not answer within {:?}",
                    self.source.describe(),
                    self.settings.read_timeout
                ))),
            };

            match reading {
                Ok(reading) => {
                    failures = 0;
                    if let Err(e) = self.apply(hardware, &reading) {
                        break StopReason::Fatal(e);
                    }
                }
                Err(e) if e.is_recoverable() => {
                    failures += 1;
                    if failures > self.settings.max_consecutive_failures {
                        break StopReason::Fatal(FanError::SensorFailuresExceeded {
                            attempts: failures,
                            limit: self.settings.max_consecutive_failures,
                            last: e.to_string(),
                        });
                    }
                    warn!(
                        stage = "sensor",
                        "Sensor read failed ({}/{}), holding {}%: {}",
                        failures,
                        self.settings.max_consecutive_failures,
                        self.controller.duty(),
                        e
                    );
                }
                Err(e) => break StopReason::Fatal(e),
            }

            self.sample_tachometer(&mut window_start);
        }
    }

    fn apply(
        &mut self,
        hardware: &mut FanHardware,
        reading: &TemperatureReading,
    ) -> pifan_core::Result<()> {
        match self.controller.evaluate(reading) {
            Some(transition) => {
                let duty = self.controller.duty();
                hardware.set_duty(duty)?;
                info!(
                    temp_c = reading.celsius,
                    tier = self.controller.curve().name(self.controller.level()),
                    duty,
                    rpm = self.last_rpm,
                    "{} {} -> {}",
                    if transition.is_escalation() { "Escalating" } else { "De-escalating" },
                    transition.from,
                    transition.to
                );
            }
            None => {
                debug!(
                    temp_c = reading.celsius,
                    tier = self.controller.curve().name(self.controller.level()),
                    duty = self.controller.duty(),
                    rpm = self.last_rpm,
                    "Holding"
                );
            }
        }
        Ok(())
    }

    fn sample_tachometer(&mut self, window_start: &mut Option<Instant>) {
        let Some(tach) = &self.tach else {
            return;
        };

        let now = Instant::now();
        let Some(started) = window_start.replace(now) else {
            tach.begin_window();
            return;
        };

        let elapsed = now.duration_since(started);
        let sample = tach.end_window(elapsed);
        let rpm = sample.rpm(tach.pulses_per_revolution());
        debug!(pulses = sample.pulses, rpm, "Tachometer window {:?}", elapsed);
        self.last_rpm = Some(rpm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pifan_core::{DutyLevel, FanCurve};
    use pifan_hardware::mock::MockPwmLine;
    use pifan_hardware::{PwmLine, PwmOutput};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum Step {
        Temp(f32),
        Unavailable,
        Invalid,
        Hang,
    }

    /// Replays a fixed script, then repeats its last temperature
    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        last: Mutex<f32>,
        reads: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                last: Mutex::new(25.0),
                reads: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl TemperatureSource for ScriptedSource {
        async fn read(&self) -> pifan_core::Result<TemperatureReading> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Temp(c)) => {
                    *self.last.lock().unwrap() = c;
                    Ok(TemperatureReading::new(c))
                }
                Some(Step::Unavailable) => Err(FanError::SensorUnavailable("gone".into())),
                Some(Step::Invalid) => Err(FanError::SensorDataInvalid("garbage".into())),
                Some(Step::Hang) => {
                    std::future::pending::<pifan_core::Result<TemperatureReading>>().await
                }
                None => Ok(TemperatureReading::new(*self.last.lock().unwrap())),
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            period: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
            max_consecutive_failures: 3,
        }
    }

    fn create_loop(steps: Vec<Step>, initial: &str) -> ControlLoop<ScriptedSource> {
        let curve = FanCurve::default();
        let level = curve.level_named(initial).unwrap();
        let controller = HysteresisController::new(curve, level, std::time::Instant::now());
        ControlLoop::new(settings(), ScriptedSource::new(steps), controller, None)
    }

    fn mock_hardware(line: &MockPwmLine) -> FanHardware {
        FanHardware::new(
            PwmOutput::new(Box::new(line.clone()) as Box<dyn PwmLine>),
            None,
        )
    }

    fn cancel_after(token: &CancellationToken, after: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            time::sleep(after).await;
            token.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_stops_cleanly() {
        let line = MockPwmLine::new(13);
        let mut control = create_loop(vec![Step::Temp(20.0)], "off");
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_secs(7));

        let outcome = control.run(|| Ok(mock_hardware(&line)), cancel).await;

        assert!(matches!(outcome.reason, StopReason::Signal));
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.released);
        assert_eq!(line.release_count(), 1);
        assert_eq!(control.state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_and_hold_within_band() {
        let line = MockPwmLine::new(13);
        let steps = vec![
            Step::Temp(35.0),
            Step::Temp(57.0),
            Step::Temp(56.0),
            Step::Temp(70.0),
        ];
        let mut control = create_loop(steps, "off");
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_secs(10));

        let outcome = control.run(|| Ok(mock_hardware(&line)), cancel).await;

        assert_eq!(outcome.exit_code(), 0);
        // initial, quiet, medium, (hold), full, release
        assert_eq!(line.writes(), vec![0, 40, 75, 100, 0]);
        assert_eq!(control.controller().level(), DutyLevel::new(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_consecutive_failure_is_fatal() {
        let line = MockPwmLine::new(13);
        let steps = vec![
            Step::Unavailable,
            Step::Invalid,
            Step::Unavailable,
            Step::Unavailable,
        ];
        let mut control = create_loop(steps, "medium");

        let outcome = control
            .run(|| Ok(mock_hardware(&line)), CancellationToken::new())
            .await;

        match &outcome.reason {
            StopReason::Fatal(FanError::SensorFailuresExceeded { attempts, limit, .. }) => {
                assert_eq!(*attempts, 4);
                assert_eq!(*limit, 3);
            }
            other => panic!("unexpected stop reason: {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 4);
        // Duty held at the initial tier until release
        assert_eq!(line.writes(), vec![75, 0]);
        assert_eq!(line.release_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let line = MockPwmLine::new(13);
        let steps = vec![
            Step::Unavailable,
            Step::Unavailable,
            Step::Unavailable,
            Step::Temp(35.0),
            Step::Invalid,
            Step::Invalid,
            Step::Invalid,
            Step::Temp(35.0),
        ];
        let mut control = create_loop(steps, "off");
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_secs(25));

        let outcome = control.run(|| Ok(mock_hardware(&line)), cancel).await;

        assert!(matches!(outcome.reason, StopReason::Signal));
        assert_eq!(line.writes(), vec![0, 40, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_sensor_times_out() {
        let line = MockPwmLine::new(13);
        let steps = vec![Step::Hang, Step::Hang, Step::Hang, Step::Hang];
        let mut control = create_loop(steps, "off");

        let outcome = control
            .run(|| Ok(mock_hardware(&line)), CancellationToken::new())
            .await;

        match &outcome.reason {
            StopReason::Fatal(FanError::SensorFailuresExceeded { last, .. }) => {
                assert!(last.contains("did not answer"));
            }
            other => panic!("unexpected stop reason: {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pending_read() {
        let line = MockPwmLine::new(13);
        let mut control = create_loop(vec![Step::Hang], "off");
        control.settings.read_timeout = Duration::from_secs(60);
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_secs(1));

        let started = Instant::now();
        let outcome = control.run(|| Ok(mock_hardware(&line)), cancel).await;

        assert!(matches!(outcome.reason, StopReason::Signal));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(line.release_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_failure_releases_nothing() {
        let mut control = create_loop(vec![Step::Temp(40.0)], "off");
        let reads = control.source.reads.clone();

        let outcome = control
            .run(
                || Err(FanError::Hardware("/dev/gpiomem: permission denied".into())),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome.reason,
            StopReason::Fatal(FanError::HardwareAcquisitionFailed(_))
        ));
        assert_eq!(outcome.exit_code(), 3);
        assert!(!outcome.released);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(control.state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_failure_sets_exit_code() {
        let line = MockPwmLine::new(13);
        line.fail_release(true);
        let mut control = create_loop(vec![Step::Temp(20.0)], "off");
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_secs(1));

        let outcome = control.run(|| Ok(mock_hardware(&line)), cancel).await;

        assert!(matches!(
            outcome.release_error,
            Some(FanError::HardwareReleaseFailed(_))
        ));
        assert_eq!(outcome.exit_code(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_measured_per_window() {
        let line = MockPwmLine::new(13);
        let counter = Arc::new(TachometerCounter::new(2, Duration::ZERO));
        let curve = FanCurve::default();
        let controller =
            HysteresisController::new(curve, DutyLevel::LOWEST, std::time::Instant::now());
        let mut control = ControlLoop::new(
            settings(),
            ScriptedSource::new(vec![Step::Temp(20.0)]),
            controller,
            Some(counter.clone()),
        );

        let edges = counter.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(1)).await;
            for _ in 0..30 {
                edges.record_edge();
            }
        });

        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_secs(4));
        control.run(|| Ok(mock_hardware(&line)), cancel).await;

        // 30 pulses / 2 per revolution over 3 s
        assert_eq!(control.last_rpm(), Some(300.0));
    }

    /// Sees one tachometer edge during every read
    struct EdgePerReadSource {
        counter: Arc<TachometerCounter>,
    }

    #[async_trait]
    impl TemperatureSource for EdgePerReadSource {
        async fn read(&self) -> pifan_core::Result<TemperatureReading> {
            self.counter.record_edge();
            Ok(TemperatureReading::new(20.0))
        }

        fn describe(&self) -> String {
            "edge-per-read".to_string()
        }
    }

    fn create_edge_loop(period: Duration) -> (ControlLoop<EdgePerReadSource>, CancellationToken) {
        let counter = Arc::new(TachometerCounter::new(2, Duration::from_millis(5)));
        let controller = HysteresisController::new(
            FanCurve::default(),
            DutyLevel::LOWEST,
            std::time::Instant::now(),
        );
        let settings = LoopSettings {
            period,
            ..settings()
        };
        let source = EdgePerReadSource {
            counter: counter.clone(),
        };
        let control = ControlLoop::new(settings, source, controller, Some(counter));
        (control, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_first_tick_only_opens_window() {
        let line = MockPwmLine::new(13);
        let (mut control, cancel) = create_edge_loop(Duration::from_secs(5));
        cancel_after(&cancel, Duration::from_millis(50));

        control.run(|| Ok(mock_hardware(&line)), cancel).await;

        // An edge seen within the first tick is not a measurement
        assert_eq!(control.last_rpm(), None);
    }

    #[tokio::test]
    async fn test_rpm_window_spans_a_full_period() {
        let line = MockPwmLine::new(13);
        let (mut control, cancel) = create_edge_loop(Duration::from_millis(50));
        cancel_after(&cancel, Duration::from_millis(130));

        control.run(|| Ok(mock_hardware(&line)), cancel).await;

        // One pulse per ~50 ms window at 2 pulses per revolution is ~600 RPM
        let rpm = control.last_rpm().unwrap();
        assert!(rpm > 0.0 && rpm < 1000.0, "rpm = {}", rpm);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = StaticConfig::default();
        config.control.period_ms = 500;
        let settings = LoopSettings::from_config(&config);
        assert_eq!(settings.period, Duration::from_millis(500));
        assert_eq!(settings.read_timeout, Duration::from_secs(1));
        assert_eq!(settings.max_consecutive_failures, 3);
    }
}
