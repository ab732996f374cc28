//! # Cost Estimator
//!
//! ## Responsibility
//! Turn `(primitive, input_len)` into an estimated cost with the linear
//! model `fixed_cost + per_byte_cost × input_len`.
//!
//! ## Guarantees
//! - Pure: no I/O, no shared state, same inputs give the same estimate
//! - Total over every `input_len`, including lengths larger than memory
//! - Non-decreasing in `input_len` for any validated calibration table
//!
//! ## NOT Responsible For
//! - Deciding what the estimate means (that belongs to `policy`)
//! - Deciding which input drives the cost (that belongs to `registry`)

use std::fmt;

use serde::Serialize;

use crate::calibration::CalibrationTable;
use crate::config::validation::ConfigError;
use crate::registry::Primitive;

/// An estimated execution cost in dimensionless cost units.
///
/// Never negative and never NaN; may be `+∞` when the model overflows,
/// which always classifies as offload.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
pub struct CostUnits(f64);

impl CostUnits {
    /// Zero cost.
    pub const ZERO: CostUnits = CostUnits(0.0);

    /// Wrap a raw value. Negative and NaN inputs clamp to zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() || value < 0.0 {
            Self::ZERO
        } else {
            Self(value)
        }
    }

    /// The raw value.
    pub fn get(self) -> f64 {
        self.0
    }

    /// Whole budget credits this cost consumes, rounded up.
    ///
    /// Saturates at `u64::MAX` for unbounded estimates.
    pub fn credits(self) -> u64 {
        // `as` saturates on overflow and maps +∞ to u64::MAX.
        self.0.ceil() as u64
    }
}

impl fmt::Display for CostUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Estimate the cost of running `primitive` over `input_len` bytes.
///
/// # Errors
///
/// [`ConfigError::MissingCalibration`] when the table has no entry for
/// `primitive`. That means registry and calibration are out of sync, which
/// must halt dispatch rather than fail one call.
///
/// # Panics
///
/// This function never panics.
pub fn estimate(
    table: &CalibrationTable,
    primitive: Primitive,
    input_len: u64,
) -> Result<CostUnits, ConfigError> {
    let entry = table.entry(primitive)?;
    Ok(CostUnits::new(
        entry.fixed_cost + entry.per_byte_cost * input_len as f64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationEntry;

    #[test]
    fn test_estimate_is_fixed_plus_linear() {
        let table = CalibrationTable::reference()
            .with_entry(Primitive::Hash, CalibrationEntry::new(2.0, 0.5));
        let cost = estimate(&table, Primitive::Hash, 10).expect("test: hash is calibrated");
        assert_eq!(cost.get(), 7.0);
    }

    #[test]
    fn test_estimate_zero_length_is_fixed_cost() {
        let table = CalibrationTable::reference();
        let cost = estimate(&table, Primitive::Secretbox, 0).expect("test: calibrated");
        assert_eq!(cost.get(), 0.4);
    }

    #[test]
    fn test_estimate_missing_entry_is_config_error() {
        let table = CalibrationTable::reference().without(Primitive::Hash);
        let result = estimate(&table, Primitive::Hash, 64);
        assert!(matches!(result, Err(ConfigError::MissingCalibration { .. })));
    }

    #[test]
    fn test_estimate_total_at_u64_max() {
        let table = CalibrationTable::reference();
        let cost = estimate(&table, Primitive::Stream, u64::MAX).expect("test: calibrated");
        assert!(cost.get() > 1e15);
    }

    #[test]
    fn test_credits_round_up() {
        assert_eq!(CostUnits::new(0.0).credits(), 0);
        assert_eq!(CostUnits::new(0.01).credits(), 1);
        assert_eq!(CostUnits::new(3.0).credits(), 3);
        assert_eq!(CostUnits::new(3.2).credits(), 4);
        assert_eq!(CostUnits::new(f64::INFINITY).credits(), u64::MAX);
    }

    #[test]
    fn test_new_clamps_negative_and_nan() {
        assert_eq!(CostUnits::new(-1.0), CostUnits::ZERO);
        assert_eq!(CostUnits::new(f64::NAN), CostUnits::ZERO);
    }

    #[test]
    fn test_display_three_decimals() {
        assert_eq!(CostUnits::new(1.5).to_string(), "1.500");
    }
}
