//! # tokio-crypto-dispatch
//!
//! Cost-aware dispatch of run-to-completion cryptographic primitives onto a
//! cooperative Tokio runtime.
//!
//! ## Architecture
//!
//! Every call goes through a single [`Dispatcher::invoke`]:
//! ```text
//! invoke(primitive, inputs)
//!   → validate (registry)  → estimate (calibration table)  → classify (breakoff threshold)
//!   → Inline:  DirectExecutor: runs on the calling runtime thread, debits the task budget
//!   → Offload: OffloadExecutor: FIFO queue → dedicated worker thread → PendingResult
//! ```
//!
//! Small inputs run inline because handing them to another thread costs more
//! than the primitive itself. Large inputs are moved off the runtime so no
//! single call can hold a worker thread past one scheduling slice.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

pub mod budget;
pub mod calibration;
pub mod config;
pub mod direct;
pub mod dispatcher;
pub mod estimator;
pub mod metrics;
pub mod offload;
pub mod policy;
pub mod primitives;
pub mod registry;

// Re-exports for convenience
pub use budget::{with_budget, ExecutionBudget};
pub use calibration::watcher::{spawn_calibration_reload, CalibrationWatcher};
pub use calibration::{CalibrationEntry, CalibrationTable};
pub use config::validation::ConfigError;
pub use config::DispatcherConfig;
pub use direct::DirectExecutor;
pub use dispatcher::{Dispatcher, Route};
pub use estimator::CostUnits;
pub use offload::{Cancellation, OffloadExecutor, OffloadStats, PendingResult};
pub use policy::{BreakoffThreshold, BudgetPolicy, ExecutionPath};
pub use primitives::{Output, PrimitiveBackend, RustCryptoBackend};
pub use registry::{Primitive, PrimitiveSpec};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=debug` shows
/// every routing decision).
///
/// # Errors
///
/// Returns the subscriber's init error if a global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    init_tracing_with(format)
}

/// Initialise the global tracing subscriber with an explicit format.
///
/// # Errors
///
/// As [`init_tracing`].
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing_with(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    }
}

/// Per-call failure taxonomy.
///
/// Every failure a caller can observe from [`Dispatcher::invoke`] is one of
/// these variants. A failed authenticated decryption or signature check is
/// *not* here: it is the first-class [`Output::VerificationFailed`] value.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Wrong arity, wrong buffer length, or unknown primitive id.
    ///
    /// Rejected before any execution attempt. Never retried: it indicates a
    /// caller bug.
    #[error("contract violation calling {primitive}: {reason}")]
    ContractViolation {
        /// Primitive identifier as supplied by the caller.
        primitive: String,
        /// Which constraint was violated.
        reason: String,
    },

    /// An output buffer could not be allocated.
    ///
    /// The caller may retry after backoff; the dispatcher never retries.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The primitive panicked, or an offload worker was lost mid-call.
    ///
    /// Isolated to the one request; the pool restores its capacity.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// Calibration or configuration is unusable.
    ///
    /// Fatal at load time; the dispatcher refuses to serve with undefined
    /// cost behaviour.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The offload executor has stopped accepting work.
    #[error("offload executor is shut down")]
    Shutdown,

    /// The request was withdrawn before any worker claimed it.
    #[error("request cancelled before execution")]
    Cancelled,
}

impl DispatchError {
    /// Shorthand for a [`DispatchError::ContractViolation`].
    pub fn contract(primitive: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            primitive: primitive.into(),
            reason: reason.into(),
        }
    }

    /// The comparable classification of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ContractViolation { .. } => FailureKind::ContractViolation,
            Self::ResourceExhausted(_) => FailureKind::ResourceExhausted,
            Self::WorkerFault(_) => FailureKind::WorkerFault,
            Self::Config(_) => FailureKind::Configuration,
            Self::Shutdown => FailureKind::Shutdown,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Failure classification, independent of the message payload.
///
/// Used to compare outcomes across execution paths and as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// See [`DispatchError::ContractViolation`].
    ContractViolation,
    /// See [`DispatchError::ResourceExhausted`].
    ResourceExhausted,
    /// See [`DispatchError::WorkerFault`].
    WorkerFault,
    /// See [`DispatchError::Config`].
    Configuration,
    /// See [`DispatchError::Shutdown`].
    Shutdown,
    /// See [`DispatchError::Cancelled`].
    Cancelled,
}

impl FailureKind {
    /// Stable snake_case label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContractViolation => "contract_violation",
            Self::ResourceExhausted => "resource_exhausted",
            Self::WorkerFault => "worker_fault",
            Self::Configuration => "configuration",
            Self::Shutdown => "shutdown",
            Self::Cancelled => "cancelled",
        }
    }
}
