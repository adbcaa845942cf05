//! Core types and data structures for PiFan

use std::fmt;
use std::time::Instant;

/// A single temperature sample, produced and consumed within one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    /// Temperature in Celsius
    pub celsius: f32,
    /// Monotonic capture time
    pub captured_at: Instant,
}

impl TemperatureReading {
    /// Create a reading captured now.
    pub fn new(celsius: f32) -> Self {
        Self::at(celsius, Instant::now())
    }

    /// Create a reading with an explicit capture time.
    pub fn at(celsius: f32, captured_at: Instant) -> Self {
        Self {
            celsius,
            captured_at,
        }
    }
}

impl fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}°C", self.celsius)
    }
}

/// Position of a tier on the fan curve's ladder.
///
/// Levels are totally ordered: `DutyLevel(0)` is the quietest tier and each
/// successive index is the next faster one. The tier's name and duty cycle
/// live on the [`FanCurve`](crate::FanCurve) the level indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DutyLevel(usize);

impl DutyLevel {
    /// The lowest tier on any curve.
    pub const LOWEST: DutyLevel = DutyLevel(0);

    /// Create a level from its ladder index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Ladder index of this level.
    pub const fn index(self) -> usize {
        self.0
    }

    /// The next level up (unchecked against any curve).
    pub const fn up(self) -> Self {
        Self(self.0 + 1)
    }

    /// The next level down, or `None` at the bottom.
    pub fn down(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for DutyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}
