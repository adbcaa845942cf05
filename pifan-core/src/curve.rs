//! Fan curve: the tier ladder and its hysteresis thresholds
//!
//! A curve is an ordered list of [`Tier`]s, quietest first. Every tier above
//! the first carries two thresholds:
//!
//! - `enter_c`: a reading at or above this steps the fan up into the tier
//! - `exit_c`: a reading at or below this steps the fan back down out of it
//!
//! `exit_c` must sit strictly below `enter_c`. The gap between the two is the
//! dead band that keeps a temperature hovering near a boundary from toggling
//! the fan.

use serde::{Deserialize, Serialize};

use crate::error::{FanError, Result};
use crate::types::DutyLevel;

/// One speed tier on the fan curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Human-readable tier name
    pub name: String,
    /// PWM duty cycle percentage (0-100)
    pub duty: u8,
    /// Escalation threshold into this tier, in Celsius
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enter_c: Option<f32>,
    /// De-escalation threshold out of this tier, in Celsius
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_c: Option<f32>,
}

impl Tier {
    /// The bottom tier of a curve, which has no thresholds.
    pub fn base(name: impl Into<String>, duty: u8) -> Self {
        Self {
            name: name.into(),
            duty,
            enter_c: None,
            exit_c: None,
        }
    }

    /// A tier entered at `enter_c` and left at `exit_c`.
    pub fn new(name: impl Into<String>, duty: u8, enter_c: f32, exit_c: f32) -> Self {
        Self {
            name: name.into(),
            duty,
            enter_c: Some(enter_c),
            exit_c: Some(exit_c),
        }
    }
}

/// Thresholds of one boundary between adjacent tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Band {
    escalate_c: f32,
    deescalate_c: f32,
}

/// The default tier ladder.
///
/// Breakpoints follow the Geekwork X715 vendor curve (30/50/55/60/65 °C) with a
/// 3 °C de-escalation gap below each.
pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier::base("off", 0),
        Tier::new("quiet", 40, 30.0, 27.0),
        Tier::new("low", 50, 50.0, 47.0),
        Tier::new("medium", 75, 55.0, 52.0),
        Tier::new("high", 90, 60.0, 57.0),
        Tier::new("full", 100, 65.0, 62.0),
    ]
}

/// A validated fan curve.
#[derive(Debug, Clone, PartialEq)]
pub struct FanCurve {
    tiers: Vec<Tier>,
    bands: Vec<Band>,
}

impl FanCurve {
    /// Validate `tiers` and build a curve.
    ///
    /// Rejects empty ladders, duty values above 100, missing or non-finite
    /// thresholds, degenerate bands (`exit_c >= enter_c`), thresholds that do
    /// not ascend along the ladder, and duplicate tier names.
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(FanError::Config(
                "Fan curve must have at least one tier".to_string(),
            ));
        }

        for tier in &tiers {
            if tier.duty > 100 {
                return Err(FanError::InvalidDutyValue(u32::from(tier.duty)));
            }
        }

        for (idx, tier) in tiers.iter().enumerate() {
            if tiers[..idx].iter().any(|t| t.name == tier.name) {
                return Err(FanError::Config(format!(
                    "Duplicate tier name '{}'",
                    tier.name
                )));
            }
        }

        let first = &tiers[0];
        if first.enter_c.is_some() || first.exit_c.is_some() {
            return Err(FanError::Config(format!(
                "Lowest tier '{}' must not define enter_c/exit_c",
                first.name
            )));
        }

        let mut bands: Vec<Band> = Vec::with_capacity(tiers.len() - 1);
        for tier in &tiers[1..] {
            let (Some(enter), Some(exit)) = (tier.enter_c, tier.exit_c) else {
                return Err(FanError::Config(format!(
                    "Tier '{}' must define both enter_c and exit_c",
                    tier.name
                )));
            };

            if !enter.is_finite() || !exit.is_finite() {
                return Err(FanError::Config(format!(
                    "Tier '{}' has a non-finite threshold",
                    tier.name
                )));
            }

            if exit >= enter {
                return Err(FanError::Config(format!(
                    "Tier '{}' has a degenerate band: exit_c {} must be below enter_c {}",
                    tier.name, exit, enter
                )));
            }

            if let Some(prev) = bands.last() {
                if enter <= prev.escalate_c || exit <= prev.deescalate_c {
                    return Err(FanError::Config(format!(
                        "Tier '{}' thresholds must ascend along the ladder ({}/{} after {}/{})",
                        tier.name, enter, exit, prev.escalate_c, prev.deescalate_c
                    )));
                }
            }

            bands.push(Band {
                escalate_c: enter,
                deescalate_c: exit,
            });
        }

        Ok(Self { tiers, bands })
    }

    /// Number of tiers on the ladder.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false for a validated curve.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// The quietest level.
    pub fn lowest(&self) -> DutyLevel {
        DutyLevel::LOWEST
    }

    /// The fastest level.
    pub fn highest(&self) -> DutyLevel {
        DutyLevel::new(self.tiers.len() - 1)
    }

    /// All tiers, quietest first.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Tier at `level`, if the level is on this curve.
    pub fn tier(&self, level: DutyLevel) -> Option<&Tier> {
        self.tiers.get(level.index())
    }

    /// Duty cycle for `level`. Levels past the top map to the top tier.
    pub fn duty(&self, level: DutyLevel) -> u8 {
        self.tiers
            .get(level.index())
            .or_else(|| self.tiers.last())
            .map(|t| t.duty)
            .unwrap_or(0)
    }

    /// Tier name for `level`.
    pub fn name(&self, level: DutyLevel) -> &str {
        self.tier(level).map(|t| t.name.as_str()).unwrap_or("?")
    }

    /// Look up a level by tier name.
    pub fn level_named(&self, name: &str) -> Option<DutyLevel> {
        self.tiers
            .iter()
            .position(|t| t.name == name)
            .map(DutyLevel::new)
    }

    /// Temperature at or above which `level` escalates. `None` at the top.
    pub fn upper(&self, level: DutyLevel) -> Option<f32> {
        self.bands.get(level.index()).map(|b| b.escalate_c)
    }

    /// Temperature at or below which `level` de-escalates. `None` at the bottom.
    pub fn lower(&self, level: DutyLevel) -> Option<f32> {
        let below = level.down()?;
        self.bands.get(below.index()).map(|b| b.deescalate_c)
    }
}

impl Default for FanCurve {
    fn default() -> Self {
        let tiers = default_tiers();
        let bands = tiers[1..]
            .iter()
            .filter_map(|t| {
                Some(Band {
                    escalate_c: t.enter_c?,
                    deescalate_c: t.exit_c?,
                })
            })
            .collect();
        Self { tiers, bands }
    }
}
