//! Hysteresis state machine mapping temperature readings to fan tiers
//!
//! [`step`] is the pure transition function. [`HysteresisController`] wraps it
//! with the state that persists across control loop iterations.

use std::time::Instant;

use crate::curve::FanCurve;
use crate::types::{DutyLevel, TemperatureReading};

/// Level the controller is at and when it last moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    /// Current tier
    pub level: DutyLevel,
    /// Time of the last level change (or of initialisation)
    pub last_transition: Instant,
}

impl ControllerState {
    /// Create a state at `level`, stamped `at`.
    pub fn new(level: DutyLevel, at: Instant) -> Self {
        Self {
            level,
            last_transition: at,
        }
    }
}

/// A level change produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DutyLevel,
    pub to: DutyLevel,
}

impl Transition {
    /// True when the fan sped up.
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }

    /// Number of tiers crossed.
    pub fn steps(&self) -> usize {
        self.to.index().abs_diff(self.from.index())
    }
}

/// Compute the next controller state for `reading`.
///
/// Escalates while the reading is at or above the current level's upper
/// threshold, otherwise de-escalates while it is at or below the lower one.
/// A reading strictly between the two leaves the state untouched. The
/// transition time is taken from the reading, so the result depends only on
/// the inputs.
pub fn step(
    state: &ControllerState,
    reading: &TemperatureReading,
    curve: &FanCurve,
) -> ControllerState {
    let temp = reading.celsius;
    let mut level = state.level;

    if curve.upper(level).is_some_and(|upper| temp >= upper) {
        while let Some(upper) = curve.upper(level) {
            if temp < upper {
                break;
            }
            level = level.up();
        }
    } else {
        while let Some(lower) = curve.lower(level) {
            if temp > lower {
                break;
            }
            match level.down() {
                Some(next) => level = next,
                None => break,
            }
        }
    }

    if level == state.level {
        *state
    } else {
        ControllerState::new(level, reading.captured_at)
    }
}

/// Stateful hysteresis controller owned by the control loop.
#[derive(Debug, Clone)]
pub struct HysteresisController {
    curve: FanCurve,
    state: ControllerState,
}

impl HysteresisController {
    /// Start at `initial`, clamped to the curve.
    pub fn new(curve: FanCurve, initial: DutyLevel, now: Instant) -> Self {
        let initial = initial.min(curve.highest());
        Self {
            curve,
            state: ControllerState::new(initial, now),
        }
    }

    /// Feed one reading, returning the transition if the level changed.
    pub fn evaluate(&mut self, reading: &TemperatureReading) -> Option<Transition> {
        let next = step(&self.state, reading, &self.curve);
        let from = self.state.level;
        self.state = next;

        (next.level != from).then_some(Transition {
            from,
            to: next.level,
        })
    }

    /// Current controller state.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Current level.
    pub fn level(&self) -> DutyLevel {
        self.state.level
    }

    /// Duty cycle of the current level.
    pub fn duty(&self) -> u8 {
        self.curve.duty(self.state.level)
    }

    /// The curve this controller evaluates against.
    pub fn curve(&self) -> &FanCurve {
        &self.curve
    }
}
