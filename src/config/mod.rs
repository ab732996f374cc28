//! # Declarative Dispatcher Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that sizes the dispatcher: the breakoff
//! budget, the offload pool, the per-task execution quantum, and where the
//! calibration table comes from.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `DispatcherConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Complete defaults: an empty file is a valid configuration
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Calibration coefficients (that belongs to `calibration`)
//! - Building the offload pool (that belongs to `offload`)

pub mod loader;
pub mod validation;

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Default value functions ──────────────────────────────────────────────

/// One Tokio scheduling slice, in microseconds.
fn default_wall_clock_budget_us() -> u64 {
    100
}

/// Tolerate hardware up to twice as slow as the calibration machine.
fn default_safety_margin() -> f64 {
    2.0
}

/// Cores left to the Tokio runtime when the pool size is derived.
fn default_reserved_cores() -> usize {
    1
}

/// Default offload queue depth limit.
fn default_queue_depth_limit() -> usize {
    1024
}

/// Default offload worker stack size: 2 MiB.
fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Default offload worker thread name prefix.
fn default_thread_name() -> String {
    "crypto-offload".to_string()
}

/// Default per-turn execution quantum, in cost units.
fn default_task_quantum() -> u64 {
    100
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a dispatcher instance.
///
/// Every section and field has a documented default, so an empty TOML
/// document deserializes to [`DispatcherConfig::default`].
///
/// # Example
///
/// ```toml
/// [breakoff]
/// wall_clock_budget_us = 100
/// safety_margin = 2.0
///
/// [offload]
/// pool_size = 4
/// queue_depth_limit = 1024
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DispatcherConfig {
    /// Where the inline/offload boundary sits.
    #[serde(default)]
    pub breakoff: BreakoffConfig,
    /// Offload worker pool sizing and backpressure.
    #[serde(default)]
    pub offload: OffloadConfig,
    /// Per-task execution budget accounting.
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Calibration table source.
    #[serde(default)]
    pub calibration: CalibrationSource,
    /// Observability: logging format.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Breakoff ─────────────────────────────────────────────────────────────

/// Inputs to the breakoff threshold.
///
/// The threshold in cost units is
/// `(wall_clock_budget_us / cost_unit_us) / safety_margin`, where
/// `cost_unit_us` comes from the calibration table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BreakoffConfig {
    /// Longest a single inline call may hold a runtime thread, in µs.
    #[serde(default = "default_wall_clock_budget_us")]
    pub wall_clock_budget_us: u64,
    /// Divisor applied to the budget to absorb slower hardware. Must be ≥ 1.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
}

impl Default for BreakoffConfig {
    fn default() -> Self {
        Self {
            wall_clock_budget_us: default_wall_clock_budget_us(),
            safety_margin: default_safety_margin(),
        }
    }
}

// ── Offload ──────────────────────────────────────────────────────────────

/// Offload worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OffloadConfig {
    /// Explicit worker count. When absent the pool uses
    /// `available_parallelism - reserved_cores`, never fewer than one.
    #[serde(default)]
    pub pool_size: Option<usize>,
    /// Cores kept free for the Tokio runtime when deriving `pool_size`.
    #[serde(default = "default_reserved_cores")]
    pub reserved_cores: usize,
    /// Queued (unclaimed) requests allowed before `submit` must wait.
    #[serde(default = "default_queue_depth_limit")]
    pub queue_depth_limit: usize,
    /// Stack size of each worker thread, in bytes.
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
    /// Worker threads are named `{thread_name}-{index}`.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl OffloadConfig {
    /// The number of workers the pool will start.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn effective_pool_size(&self) -> usize {
        match self.pool_size {
            Some(n) => n.max(1),
            None => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                cores.saturating_sub(self.reserved_cores).max(1)
            }
        }
    }
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            reserved_cores: default_reserved_cores(),
            queue_depth_limit: default_queue_depth_limit(),
            thread_stack_size: default_thread_stack_size(),
            thread_name: default_thread_name(),
        }
    }
}

// ── Budget ───────────────────────────────────────────────────────────────

/// Per-task execution budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BudgetConfig {
    /// Credits granted to a task on each reschedule, in cost units.
    #[serde(default = "default_task_quantum")]
    pub task_quantum: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            task_quantum: default_task_quantum(),
        }
    }
}

// ── Calibration source ───────────────────────────────────────────────────

/// Where the calibration table is loaded from.
///
/// Without a `path` the embedded reference table is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CalibrationSource {
    /// Calibration TOML file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Hot-reload the file when it changes.
    #[serde(default)]
    pub watch: bool,
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// Structured JSON lines.
    Json,
}

// ── Schema export ────────────────────────────────────────────────────────

/// Export the JSON Schema for [`DispatcherConfig`].
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the schema cannot be serialized.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(DispatcherConfig);
    serde_json::to_string_pretty(&schema)
}
