//! Tachometer pulse counting and RPM conversion
//!
//! Edges are recorded from the GPIO interrupt thread while the control loop
//! closes and reopens sampling windows. The tally is an atomic counter:
//! edges `fetch_add`, window boundaries `swap(0)`, so no pulse is lost or
//! counted twice across a boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pulses per revolution emitted by common 4-pin PC fans
pub const DEFAULT_PULSES_PER_REVOLUTION: u32 = 2;

/// Minimum spacing between two accepted edges
pub const DEFAULT_MIN_EDGE_INTERVAL: Duration = Duration::from_millis(5);

const NO_EDGE: u64 = u64::MAX;

/// Convert a pulse count over `elapsed` into revolutions per minute.
///
/// Returns 0 for an empty window, a zero-length window or a zero
/// pulses-per-revolution constant.
pub fn pulses_to_rpm(pulses: u64, pulses_per_revolution: u32, elapsed: Duration) -> f64 {
    if pulses == 0 || pulses_per_revolution == 0 || elapsed.is_zero() {
        return 0.0;
    }
    pulses as f64 / f64::from(pulses_per_revolution) / elapsed.as_secs_f64() * 60.0
}

/// Pulses gathered over one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseWindowSample {
    pub pulses: u64,
    pub elapsed: Duration,
}

impl PulseWindowSample {
    /// RPM for this window.
    pub fn rpm(&self, pulses_per_revolution: u32) -> f64 {
        pulses_to_rpm(self.pulses, pulses_per_revolution, self.elapsed)
    }
}

/// Shared pulse tally fed by the edge detector.
#[derive(Debug)]
pub struct TachometerCounter {
    pulses: AtomicU64,
    last_edge_ns: AtomicU64,
    epoch: Instant,
    min_edge_interval: Duration,
    pulses_per_revolution: u32,
}

impl TachometerCounter {
    pub fn new(pulses_per_revolution: u32, min_edge_interval: Duration) -> Self {
        Self {
            pulses: AtomicU64::new(0),
            last_edge_ns: AtomicU64::new(NO_EDGE),
            epoch: Instant::now(),
            min_edge_interval,
            pulses_per_revolution,
        }
    }

    /// Record an edge seen now. Returns false if it was rejected as bounce.
    pub fn record_edge(&self) -> bool {
        self.record_edge_at(self.epoch.elapsed())
    }

    /// Record an edge seen `since_epoch` after the counter was created.
    pub fn record_edge_at(&self, since_epoch: Duration) -> bool {
        let now = since_epoch.as_nanos().min(u128::from(NO_EDGE - 1)) as u64;
        let min_gap = self.min_edge_interval.as_nanos() as u64;

        let mut last = self.last_edge_ns.load(Ordering::Acquire);
        loop {
            if last != NO_EDGE && now.saturating_sub(last) < min_gap {
                return false;
            }
            match self.last_edge_ns.compare_exchange_weak(
                last,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => last = actual,
            }
        }

        self.pulses.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Discard whatever has accumulated and start a fresh window.
    pub fn begin_window(&self) {
        self.pulses.swap(0, Ordering::AcqRel);
    }

    /// Take the pulses accumulated since the last window boundary.
    ///
    /// The swap also opens the next window.
    pub fn end_window(&self, elapsed: Duration) -> PulseWindowSample {
        PulseWindowSample {
            pulses: self.pulses.swap(0, Ordering::AcqRel),
            elapsed,
        }
    }

    pub fn pulses_per_revolution(&self) -> u32 {
        self.pulses_per_revolution
    }
}

impl Default for TachometerCounter {
    fn default() -> Self {
        Self::new(DEFAULT_PULSES_PER_REVOLUTION, DEFAULT_MIN_EDGE_INTERVAL)
    }
}
