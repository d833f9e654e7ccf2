//! Progressive limiting: repeat offenders get smaller ceilings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// One step of the backoff table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Minimum number of recent violations for this step to apply
    pub violations: u32,
    /// Factor applied to the base ceiling
    pub multiplier: f64,
}

impl Threshold {
    pub const fn new(violations: u32, multiplier: f64) -> Self {
        Self {
            violations,
            multiplier,
        }
    }
}

/// Progressive limiting settings as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveConfig {
    #[serde(default)]
    pub enabled: bool,

    /// How long a violation counts against a key
    #[serde(default = "default_violation_ttl")]
    pub violation_ttl_secs: u64,

    /// Backoff table, ascending by violation count
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<Threshold>,
}

impl Default for ProgressiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            violation_ttl_secs: default_violation_ttl(),
            thresholds: default_thresholds(),
        }
    }
}

fn default_violation_ttl() -> u64 {
    24 * 60 * 60
}

fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold::new(0, 1.0),
        Threshold::new(3, 0.5),
        Threshold::new(5, 0.2),
        Threshold::new(10, 0.05),
    ]
}

impl ProgressiveConfig {
    pub fn violation_ttl(&self) -> Duration {
        Duration::from_secs(self.violation_ttl_secs)
    }

    /// Check the table is usable.
    ///
    /// Thresholds must be strictly ascending and multipliers must lie in
    /// (0, 1] and never grow from one step to the next, so that the
    /// effective ceiling can only shrink as violations pile up.
    pub fn validate(&self) -> Result<()> {
        if self.violation_ttl_secs == 0 {
            return Err(TollgateError::Config(
                "progressive.violation_ttl_secs must be greater than zero".to_string(),
            ));
        }

        let mut previous: Option<&Threshold> = None;
        for threshold in &self.thresholds {
            let m = threshold.multiplier;
            if !m.is_finite() || m <= 0.0 || m > 1.0 {
                return Err(TollgateError::Config(format!(
                    "progressive multiplier {} for {} violations must be in (0, 1]",
                    m, threshold.violations
                )));
            }

            if let Some(prev) = previous {
                if threshold.violations <= prev.violations {
                    return Err(TollgateError::Config(format!(
                        "progressive thresholds must be strictly ascending ({} after {})",
                        threshold.violations, prev.violations
                    )));
                }
                if m > prev.multiplier {
                    return Err(TollgateError::Config(format!(
                        "progressive multiplier {} at {} violations is larger than {} at {}",
                        m, threshold.violations, prev.multiplier, prev.violations
                    )));
                }
            }
            previous = Some(threshold);
        }

        Ok(())
    }
}

/// Computes the effective ceiling for a key from its recent violations.
#[derive(Debug, Clone)]
pub struct ProgressiveLimits {
    enabled: bool,
    thresholds: Vec<Threshold>,
}

impl ProgressiveLimits {
    /// Build the calculator from validated configuration.
    pub fn from_config(config: &ProgressiveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            enabled: config.enabled,
            thresholds: config.thresholds.clone(),
        })
    }

    /// A calculator that always returns the base ceiling.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            thresholds: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Multiplier of the highest threshold the violation count reaches.
    pub fn multiplier(&self, violations: u32) -> f64 {
        let mut selected = 1.0;
        for threshold in &self.thresholds {
            if violations < threshold.violations {
                break;
            }
            selected = threshold.multiplier;
        }
        selected
    }

    /// Adjusted ceiling, never below one.
    pub fn effective_ceiling(&self, base: u32, violations: u32) -> u32 {
        if !self.enabled {
            return base;
        }

        let scaled = (f64::from(base) * self.multiplier(violations)).floor();
        // `scaled` is within [0, base] because multipliers are in (0, 1].
        (scaled as u32).max(1)
    }
}
