//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`DispatcherConfig`] that cannot
//! be expressed through the type system alone (range checks, the safety
//! margin floor, the semaphore permit ceiling).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - Calibration coefficients (that belongs to `calibration`)

use tokio::sync::Semaphore;

use super::DispatcherConfig;

/// Errors arising from configuration or calibration parsing, validation, or I/O.
///
/// Every variant is fatal at load time: the dispatcher refuses to serve
/// rather than route calls with undefined cost behaviour.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "breakoff.safety_margin").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// A registered primitive has no calibration entry.
    #[error("missing calibration entry for `{primitive}`")]
    MissingCalibration {
        /// Identifier of the uncovered primitive.
        primitive: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Fold a collected error list into one error.
    ///
    /// A single error is returned as-is so callers can still match on its
    /// variant; several are joined line by line into [`ConfigError::Validation`].
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn from_many(mut errors: Vec<ConfigError>) -> ConfigError {
        if errors.len() == 1 {
            if let Some(only) = errors.pop() {
                return only;
            }
        }
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Validate all semantic constraints on a [`DispatcherConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &DispatcherConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Breakoff ─────────────────────────────────────────────────────
    if config.breakoff.wall_clock_budget_us == 0 {
        errors.push(ConfigError::InvalidField {
            field: "breakoff.wall_clock_budget_us".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    let margin = config.breakoff.safety_margin;
    if !margin.is_finite() || margin < 1.0 {
        errors.push(ConfigError::InvalidField {
            field: "breakoff.safety_margin".into(),
            value: margin.to_string(),
            reason: "must be a finite multiplier \u{2265} 1.0".into(),
        });
    }

    // ── Offload pool ─────────────────────────────────────────────────
    if config.offload.pool_size == Some(0) {
        errors.push(ConfigError::InvalidField {
            field: "offload.pool_size".into(),
            value: "0".into(),
            reason: "must be at least 1 when set".into(),
        });
    }

    let depth = config.offload.queue_depth_limit;
    if depth == 0 {
        errors.push(ConfigError::InvalidField {
            field: "offload.queue_depth_limit".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    } else if depth > Semaphore::MAX_PERMITS {
        errors.push(ConfigError::InvalidField {
            field: "offload.queue_depth_limit".into(),
            value: depth.to_string(),
            reason: format!("must be \u{2264} {}", Semaphore::MAX_PERMITS),
        });
    }

    if config.offload.thread_stack_size == 0 {
        errors.push(ConfigError::InvalidField {
            field: "offload.thread_stack_size".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.offload.thread_name.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "offload.thread_name".into(),
            value: "\"\"".into(),
            reason: "must not be empty".into(),
        });
    }

    // ── Budget ───────────────────────────────────────────────────────
    if config.budget.task_quantum == 0 {
        errors.push(ConfigError::InvalidField {
            field: "budget.task_quantum".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    // ── Calibration source ───────────────────────────────────────────
    if config.calibration.watch && config.calibration.path.is_none() {
        errors.push(ConfigError::InvalidField {
            field: "calibration.watch".into(),
            value: "true".into(),
            reason: "requires calibration.path".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
