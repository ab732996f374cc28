//! # Budget Policy
//!
//! ## Responsibility
//! Convert the configured wall-clock breakoff budget into a cost-unit
//! ceiling and classify estimates against it.
//!
//! ## Guarantees
//! - One global threshold shared by every primitive
//! - `Inline` iff `cost <= threshold`; NaN-free, so the rule is total
//! - Immutable once built: recalibration builds a new policy, it never
//!   edits one in place
//!
//! ## NOT Responsible For
//! - Publishing the policy atomically with its table (that belongs to `dispatcher`)

use std::fmt;

use crate::calibration::CalibrationTable;
use crate::config::BreakoffConfig;
use crate::estimator::CostUnits;

/// Where a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// On the calling Tokio worker thread, charged to the task budget.
    Inline,
    /// On a dedicated offload worker thread.
    Offload,
}

impl ExecutionPath {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Offload => "offload",
        }
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost-unit ceiling above which a call must be offloaded.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct BreakoffThreshold(CostUnits);

impl BreakoffThreshold {
    /// `(wall_clock_budget_us / cost_unit_us) / safety_margin`.
    ///
    /// A non-positive unit or margin yields a zero threshold, which sends
    /// every call to the offload pool. Validated inputs never hit that case.
    pub fn derive(wall_clock_budget_us: u64, cost_unit_us: f64, safety_margin: f64) -> Self {
        if cost_unit_us <= 0.0 || safety_margin <= 0.0 {
            return Self(CostUnits::ZERO);
        }
        Self(CostUnits::new(
            (wall_clock_budget_us as f64 / cost_unit_us) / safety_margin,
        ))
    }

    /// Build from a known cost-unit ceiling.
    pub fn from_cost(ceiling: CostUnits) -> Self {
        Self(ceiling)
    }

    /// The ceiling in cost units.
    pub fn cost_units(self) -> CostUnits {
        self.0
    }
}

impl fmt::Display for BreakoffThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Classifies estimates as inline-eligible or offload-required.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetPolicy {
    threshold: BreakoffThreshold,
}

impl BudgetPolicy {
    /// Policy with an explicit threshold.
    pub fn new(threshold: BreakoffThreshold) -> Self {
        Self { threshold }
    }

    /// Policy derived from breakoff configuration and a calibration table.
    pub fn from_config(config: &BreakoffConfig, table: &CalibrationTable) -> Self {
        Self::new(BreakoffThreshold::derive(
            config.wall_clock_budget_us,
            table.cost_unit_us(),
            config.safety_margin,
        ))
    }

    /// The threshold this policy classifies against.
    pub fn threshold(&self) -> BreakoffThreshold {
        self.threshold
    }

    /// `Inline` iff `cost <= threshold`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn classify(&self, cost: CostUnits) -> ExecutionPath {
        if cost <= self.threshold.cost_units() {
            ExecutionPath::Inline
        } else {
            ExecutionPath::Offload
        }
    }
}
