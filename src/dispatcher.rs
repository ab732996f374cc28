//! # Dispatcher
//!
//! ## Responsibility
//! The single entry point for every primitive call: validate the arguments,
//! estimate the cost, classify it against the breakoff threshold, and hand
//! the call to the direct or the offload executor.
//!
//! ## Guarantees
//! - Validation happens before any execution attempt
//! - The calibration table and the threshold derived from it are published
//!   together as one snapshot; a call never pairs a new table with an old
//!   threshold
//! - The path never changes the result: both executors call the same backend
//!   and classify faults the same way
//! - Safe to share across tasks (`Arc<Dispatcher>`); no lock on the hot path
//!
//! ## NOT Responsible For
//! - Cryptography (that belongs to the backend)
//! - Watching calibration files (that belongs to `calibration::watcher`)

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::calibration::CalibrationTable;
use crate::config::validation::{self, ConfigError};
use crate::config::DispatcherConfig;
use crate::direct::DirectExecutor;
use crate::estimator::{self, CostUnits};
use crate::metrics;
use crate::offload::{OffloadExecutor, OffloadStats};
use crate::policy::{BreakoffThreshold, BudgetPolicy, ExecutionPath};
use crate::primitives::{Output, PrimitiveBackend, RustCryptoBackend};
use crate::registry::Primitive;
use crate::DispatchError;

/// Calibration table and the policy derived from it, swapped as one unit.
#[derive(Debug)]
struct CostModel {
    table: CalibrationTable,
    policy: BudgetPolicy,
}

impl CostModel {
    fn build(config: &DispatcherConfig, table: CalibrationTable) -> Result<Self, ConfigError> {
        table.validate().map_err(ConfigError::from_many)?;
        let policy = BudgetPolicy::from_config(&config.breakoff, &table);
        Ok(Self { table, policy })
    }
}

/// The routing decision for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    /// Primitive being called.
    pub primitive: Primitive,
    /// Length of the cost-driving input.
    pub input_len: u64,
    /// Estimated cost.
    pub cost: CostUnits,
    /// Where the call runs.
    pub path: ExecutionPath,
}

/// Cost-aware dispatcher of primitive calls.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_crypto_dispatch::{CalibrationTable, Dispatcher, DispatcherConfig, Primitive};
///
/// let dispatcher = Dispatcher::new(DispatcherConfig::default(), CalibrationTable::reference())?;
/// let digest = dispatcher.invoke(Primitive::Hash, vec![b"hello".to_vec()]).await?;
/// ```
pub struct Dispatcher {
    config: DispatcherConfig,
    model: ArcSwap<CostModel>,
    direct: DirectExecutor,
    offload: Arc<OffloadExecutor>,
}

impl Dispatcher {
    /// Dispatcher over the production [`RustCryptoBackend`].
    ///
    /// # Errors
    ///
    /// [`DispatchError::Config`] if `config` is invalid or `table` does not
    /// cover every registered primitive; [`DispatchError::ResourceExhausted`]
    /// if the offload workers cannot be started.
    pub fn new(config: DispatcherConfig, table: CalibrationTable) -> Result<Self, DispatchError> {
        Self::with_backend(config, table, Arc::new(RustCryptoBackend::new()))
    }

    /// Dispatcher over the table named in `config.calibration.path`, or the
    /// reference table when no path is set.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new), plus calibration file I/O and parse errors.
    pub fn from_config(config: DispatcherConfig) -> Result<Self, DispatchError> {
        let table = match &config.calibration.path {
            Some(path) => CalibrationTable::from_file(path)?,
            None => CalibrationTable::reference(),
        };
        Self::new(config, table)
    }

    /// Dispatcher over a caller-supplied backend.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_backend(
        config: DispatcherConfig,
        table: CalibrationTable,
        backend: Arc<dyn PrimitiveBackend>,
    ) -> Result<Self, DispatchError> {
        validation::validate(&config).map_err(ConfigError::from_many)?;
        let model = CostModel::build(&config, table)?;
        let offload = OffloadExecutor::new(&config.offload, Arc::clone(&backend))?;

        tracing::info!(
            threshold = %model.policy.threshold(),
            wall_clock_budget_us = config.breakoff.wall_clock_budget_us,
            safety_margin = config.breakoff.safety_margin,
            cost_unit_us = model.table.cost_unit_us(),
            "dispatcher ready"
        );

        Ok(Self {
            direct: DirectExecutor::new(backend),
            offload: Arc::new(offload),
            model: ArcSwap::from_pointee(model),
            config,
        })
    }

    /// Validate, estimate, and classify a call without running it.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ContractViolation`] for bad arity or buffer lengths;
    /// [`DispatchError::Config`] if the published table lacks the primitive.
    pub fn route(&self, primitive: Primitive, inputs: &[Vec<u8>]) -> Result<Route, DispatchError> {
        let input_len = primitive.spec().validate(inputs)?;
        let model = self.model.load();
        let cost = estimator::estimate(&model.table, primitive, input_len)?;
        Ok(Route {
            primitive,
            input_len,
            cost,
            path: model.policy.classify(cost),
        })
    }

    /// Run one primitive call on whichever path its cost dictates.
    ///
    /// Dropping the returned future before an offloaded call is claimed
    /// withdraws it from the queue.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`]. A failed authenticity check is *not* an error:
    /// it is `Ok(Output::VerificationFailed)`.
    pub async fn invoke(
        &self,
        primitive: Primitive,
        inputs: Vec<Vec<u8>>,
    ) -> Result<Output, DispatchError> {
        let route = match self.route(primitive, &inputs) {
            Ok(route) => route,
            Err(e) => {
                tracing::debug!(%primitive, error = %e, "call rejected before execution");
                metrics::inc_failure(primitive.as_str(), e.kind().as_str());
                return Err(e);
            }
        };

        tracing::debug!(
            %primitive,
            input_len = route.input_len,
            cost = %route.cost,
            path = %route.path,
            "dispatching"
        );
        metrics::inc_invocation(primitive.as_str(), route.path.as_str());

        let result = match route.path {
            ExecutionPath::Inline => self.direct.execute(primitive, &inputs, route.cost).await,
            ExecutionPath::Offload => match self.offload.submit(primitive, inputs).await {
                Ok(pending) => pending.await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &result {
            tracing::warn!(%primitive, path = %route.path, error = %e, "primitive call failed");
            metrics::inc_failure(primitive.as_str(), e.kind().as_str());
        }
        result
    }

    /// [`invoke`](Self::invoke) by string identifier.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ContractViolation`] for an unknown identifier, then
    /// as [`invoke`](Self::invoke).
    pub async fn invoke_named(
        &self,
        id: &str,
        inputs: Vec<Vec<u8>>,
    ) -> Result<Output, DispatchError> {
        let primitive: Primitive = match id.parse() {
            Ok(p) => p,
            Err(e) => {
                metrics::inc_failure("unknown", crate::FailureKind::ContractViolation.as_str());
                return Err(e);
            }
        };
        self.invoke(primitive, inputs).await
    }

    /// Validate `table` and atomically replace the published cost model.
    ///
    /// On error the previous table and threshold stay in force.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingCalibration`] and friends from table validation.
    pub fn load_calibration(&self, table: CalibrationTable) -> Result<(), ConfigError> {
        let model = CostModel::build(&self.config, table)?;
        let threshold = model.policy.threshold();
        self.model.store(Arc::new(model));
        tracing::info!(%threshold, "calibration table swapped");
        Ok(())
    }

    /// Current breakoff threshold.
    pub fn threshold(&self) -> BreakoffThreshold {
        self.model.load().policy.threshold()
    }

    /// Copy of the current calibration table.
    pub fn calibration(&self) -> CalibrationTable {
        self.model.load().table.clone()
    }

    /// The configuration this dispatcher was built with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// The offload executor, for callers that need a cancellable handle.
    pub fn offload(&self) -> &OffloadExecutor {
        &self.offload
    }

    /// Offload pool counters.
    pub fn offload_stats(&self) -> OffloadStats {
        self.offload.stats()
    }

    /// Stop offload intake, drain queued requests, and join the workers.
    ///
    /// The blocking join runs on Tokio's blocking pool. Inline calls keep
    /// working; offloaded calls fail with [`DispatchError::Shutdown`].
    ///
    /// # Errors
    ///
    /// [`DispatchError::WorkerFault`] if the join task itself panicked.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        let offload = Arc::clone(&self.offload);
        tokio::task::spawn_blocking(move || offload.shutdown())
            .await
            .map_err(|e| DispatchError::WorkerFault(format!("offload shutdown failed: {e}")))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("threshold", &self.threshold())
            .field("offload", &self.offload)
            .finish()
    }
}
