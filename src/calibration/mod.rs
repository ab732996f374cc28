//! # Calibration Table
//!
//! ## Responsibility
//! Hold the per-primitive linear cost coefficients measured offline, load
//! them from TOML, and check that they cover the whole registry.
//!
//! ## Guarantees
//! - A table accepted by [`CalibrationTable::validate`] has exactly one
//!   entry per registered primitive, every coefficient finite and ≥ 0
//! - Validation collects every problem in one pass
//! - Tables are plain values; publication to readers is done by the
//!   dispatcher through an atomic snapshot swap
//!
//! ## NOT Responsible For
//! - Measuring the coefficients (an offline benchmark harness produces them)
//! - Turning coefficients into estimates (that belongs to `estimator`)
//!
//! ## File format
//!
//! ```toml
//! cost_unit_us = 1.0
//!
//! [entries.secretbox]
//! fixed_cost = 0.4
//! per_byte_cost = 0.0015
//! ```

pub mod watcher;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::validation::ConfigError;
use crate::registry::Primitive;

/// Linear cost coefficients for one primitive, in cost units.
///
/// `estimate = fixed_cost + per_byte_cost × input_len`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationEntry {
    /// Cost paid regardless of input size.
    pub fixed_cost: f64,
    /// Additional cost per byte of the cost-driving input.
    #[serde(default)]
    pub per_byte_cost: f64,
}

impl CalibrationEntry {
    /// Build an entry from its two coefficients.
    pub const fn new(fixed_cost: f64, per_byte_cost: f64) -> Self {
        Self {
            fixed_cost,
            per_byte_cost,
        }
    }
}

/// On-disk shape. Keys stay strings so unknown ids can be reported
/// alongside every other problem instead of aborting the parse.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    #[serde(default = "default_cost_unit_us")]
    cost_unit_us: f64,
    #[serde(default)]
    entries: BTreeMap<String, CalibrationEntry>,
}

fn default_cost_unit_us() -> f64 {
    1.0
}

/// Coefficients measured on the reference machine (one cost unit ≈ 1 µs).
const REFERENCE: [(Primitive, CalibrationEntry); 17] = [
    (Primitive::BoxKeypair, CalibrationEntry::new(32.0, 0.0)),
    (Primitive::Box, CalibrationEntry::new(36.0, 0.0015)),
    (Primitive::BoxOpen, CalibrationEntry::new(36.0, 0.0015)),
    (Primitive::SignKeypair, CalibrationEntry::new(16.0, 0.0)),
    (Primitive::Sign, CalibrationEntry::new(18.0, 0.004)),
    (Primitive::SignOpen, CalibrationEntry::new(44.0, 0.002)),
    (Primitive::Secretbox, CalibrationEntry::new(0.4, 0.0015)),
    (Primitive::SecretboxOpen, CalibrationEntry::new(0.4, 0.0015)),
    (Primitive::Stream, CalibrationEntry::new(0.15, 0.001)),
    (Primitive::StreamXor, CalibrationEntry::new(0.15, 0.0012)),
    (Primitive::Auth, CalibrationEntry::new(0.6, 0.002)),
    (Primitive::AuthVerify, CalibrationEntry::new(0.6, 0.002)),
    (Primitive::Onetimeauth, CalibrationEntry::new(0.05, 0.0004)),
    (Primitive::OnetimeauthVerify, CalibrationEntry::new(0.05, 0.0004)),
    (Primitive::Hash, CalibrationEntry::new(0.2, 0.002)),
    (Primitive::Verify16, CalibrationEntry::new(0.01, 0.0)),
    (Primitive::Verify32, CalibrationEntry::new(0.01, 0.0)),
];

/// Per-primitive coefficients plus the wall-clock size of one cost unit.
///
/// A table may be built incomplete (for instance while assembling it by
/// hand); [`validate`](Self::validate) is what the dispatcher checks before
/// it will serve with it.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    cost_unit_us: f64,
    entries: BTreeMap<Primitive, CalibrationEntry>,
}

impl CalibrationTable {
    /// Assemble a table without validating it.
    pub fn from_entries(
        cost_unit_us: f64,
        entries: impl IntoIterator<Item = (Primitive, CalibrationEntry)>,
    ) -> Self {
        Self {
            cost_unit_us,
            entries: entries.into_iter().collect(),
        }
    }

    /// The built-in table measured on the reference machine.
    pub fn reference() -> Self {
        Self::from_entries(1.0, REFERENCE)
    }

    /// Parse and validate a table from TOML text.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] if the TOML is malformed.
    /// - [`ConfigError::MissingCalibration`], [`ConfigError::InvalidField`],
    ///   or a combined [`ConfigError::Validation`] if the content is unusable.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn from_toml_str(content: &str, source_name: &str) -> Result<Self, ConfigError> {
        let raw: RawTable = toml::from_str(content).map_err(|e| ConfigError::Parse {
            file: source_name.to_string(),
            source: e,
        })?;

        let mut errors = Vec::new();
        let mut entries = BTreeMap::new();
        for (id, entry) in raw.entries {
            match Primitive::from_str(&id) {
                Ok(primitive) => {
                    entries.insert(primitive, entry);
                }
                Err(_) => errors.push(ConfigError::InvalidField {
                    field: format!("entries.{id}"),
                    value: id.clone(),
                    reason: "not a registered primitive".into(),
                }),
            }
        }

        let table = Self {
            cost_unit_us: raw.cost_unit_us,
            entries,
        };
        if let Err(mut found) = table.validate() {
            errors.append(&mut found);
        }

        if errors.is_empty() {
            Ok(table)
        } else {
            Err(ConfigError::from_many(errors))
        }
    }

    /// Read, parse, and validate a table from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            file: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Check coverage and coefficient sanity, collecting every violation.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if !self.cost_unit_us.is_finite() || self.cost_unit_us <= 0.0 {
            errors.push(ConfigError::InvalidField {
                field: "cost_unit_us".into(),
                value: self.cost_unit_us.to_string(),
                reason: "must be finite and > 0".into(),
            });
        }

        for primitive in Primitive::ALL {
            let Some(entry) = self.entries.get(&primitive) else {
                errors.push(ConfigError::MissingCalibration {
                    primitive: primitive.as_str().to_string(),
                });
                continue;
            };
            for (name, value) in [
                ("fixed_cost", entry.fixed_cost),
                ("per_byte_cost", entry.per_byte_cost),
            ] {
                if !value.is_finite() || value < 0.0 {
                    errors.push(ConfigError::InvalidField {
                        field: format!("entries.{primitive}.{name}"),
                        value: value.to_string(),
                        reason: "must be finite and \u{2265} 0".into(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Wall-clock microseconds represented by one cost unit.
    pub fn cost_unit_us(&self) -> f64 {
        self.cost_unit_us
    }

    /// The entry for `primitive`, if present.
    pub fn get(&self, primitive: Primitive) -> Option<&CalibrationEntry> {
        self.entries.get(&primitive)
    }

    /// The entry for `primitive`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingCalibration`] when the table does not cover it.
    pub fn entry(&self, primitive: Primitive) -> Result<&CalibrationEntry, ConfigError> {
        self.entries
            .get(&primitive)
            .ok_or_else(|| ConfigError::MissingCalibration {
                primitive: primitive.as_str().to_string(),
            })
    }

    /// Replace or add one entry, returning the modified table.
    #[must_use]
    pub fn with_entry(mut self, primitive: Primitive, entry: CalibrationEntry) -> Self {
        self.entries.insert(primitive, entry);
        self
    }

    /// Drop one entry, returning the modified table.
    #[must_use]
    pub fn without(mut self, primitive: Primitive) -> Self {
        self.entries.remove(&primitive);
        self
    }

    /// Entries in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (Primitive, &CalibrationEntry)> {
        self.entries.iter().map(|(p, e)| (*p, e))
    }

    /// Number of entries present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
