//! # Direct Executor
//!
//! ## Responsibility
//! Run an inline-eligible primitive on the calling runtime thread and
//! charge its estimated cost to the current task's [`ExecutionBudget`].
//!
//! ## Guarantees
//! - The call always runs, even when the debit overdraws the budget; the
//!   debt is settled afterwards by yielding to the scheduler
//! - A panicking primitive is reported as [`DispatchError::WorkerFault`],
//!   the same classification the offload path uses
//!
//! ## NOT Responsible For
//! - Checking that the call is cheap enough (that belongs to `policy`)

use std::sync::Arc;
use std::time::Instant;

use crate::budget::{self, ExecutionBudget};
use crate::estimator::CostUnits;
use crate::metrics;
use crate::primitives::{call_guarded, Output, PrimitiveBackend};
use crate::registry::Primitive;
use crate::DispatchError;

/// Inline execution with budget accounting.
#[derive(Clone)]
pub struct DirectExecutor {
    backend: Arc<dyn PrimitiveBackend>,
}

impl DirectExecutor {
    /// Executor over `backend`.
    pub fn new(backend: Arc<dyn PrimitiveBackend>) -> Self {
        Self { backend }
    }

    /// Run `primitive` now, then settle any budget debt.
    ///
    /// When no budget is bound to the task (see [`budget::with_budget`]) the
    /// call is not charged.
    ///
    /// # Errors
    ///
    /// Whatever the backend returns, or [`DispatchError::WorkerFault`] if it
    /// panicked.
    pub async fn execute(
        &self,
        primitive: Primitive,
        inputs: &[Vec<u8>],
        cost: CostUnits,
    ) -> Result<Output, DispatchError> {
        let budget = budget::current();
        let result = self.run(primitive, inputs, cost, budget.as_deref());
        if let Some(budget) = budget {
            budget.settle().await;
        }
        result
    }

    /// The synchronous part of [`execute`](Self::execute): debit, then run.
    pub fn run(
        &self,
        primitive: Primitive,
        inputs: &[Vec<u8>],
        cost: CostUnits,
        budget: Option<&ExecutionBudget>,
    ) -> Result<Output, DispatchError> {
        if let Some(budget) = budget {
            let balance = budget.debit(cost.credits());
            if balance < 0 {
                tracing::trace!(%primitive, %cost, balance, "inline call overdraws task budget");
            }
        }
        let started = Instant::now();
        let result = call_guarded(self.backend.as_ref(), primitive, inputs);
        metrics::record_primitive_latency("inline", started.elapsed());
        result
    }
}

impl std::fmt::Debug for DirectExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectExecutor").finish_non_exhaustive()
    }
}
