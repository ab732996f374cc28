//! # Execution Budget
//!
//! ## Responsibility
//! Track how many cost units a Tokio task may spend inline before it owes
//! the scheduler a yield, and settle that debt by yielding.
//!
//! ## Guarantees
//! - Debits never block and never fail: an inline call always runs, and an
//!   overdrawn balance simply goes negative ("pay it forward, settle later")
//! - Every reschedule of a task run under [`with_budget`] is one turn, and
//!   each turn is worth one quantum, credited lazily on the next debit
//! - Replenishment is capped at one quantum, so a long-idle task cannot
//!   bank credit; debt larger than one quantum takes several turns to repay
//! - Settlement suspends cooperatively via `tokio::task::yield_now`
//!
//! ## NOT Responsible For
//! - Deciding whether a call may run inline (that belongs to `policy`)
//! - Tokio's own coop budget, which is independent of this one

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

tokio::task_local! {
    static TASK_BUDGET: Arc<ExecutionBudget>;
}

/// Cost-unit credit of one logical task.
///
/// Balance starts at one full quantum. Each reschedule of the task adds one
/// quantum back, capped at one quantum. Under [`with_budget`] every poll of
/// the task counts as a turn; an unbound budget only gains credit from
/// [`replenish`](Self::replenish) and [`settle`](Self::settle).
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct ExecutionBudget {
    balance: AtomicI64,
    quantum: i64,
    turns: AtomicU64,
    credited_turns: AtomicU64,
}

impl ExecutionBudget {
    /// A budget of `quantum` credits per turn. A zero quantum is raised to 1.
    pub fn new(quantum: u64) -> Self {
        let quantum = i64::try_from(quantum).unwrap_or(i64::MAX).max(1);
        Self {
            balance: AtomicI64::new(quantum),
            quantum,
            turns: AtomicU64::new(0),
            credited_turns: AtomicU64::new(0),
        }
    }

    /// Credits granted per turn.
    pub fn quantum(&self) -> u64 {
        self.quantum.unsigned_abs()
    }

    /// Current balance; negative while the task is in debt.
    pub fn remaining(&self) -> i64 {
        self.balance.load(Ordering::Acquire)
    }

    /// `true` while the balance is below zero.
    pub fn is_overdrawn(&self) -> bool {
        self.remaining() < 0
    }

    /// Charge `credits` and return the new balance. Saturates at `i64::MIN`.
    ///
    /// Turns that began since the last charge are credited first.
    pub fn debit(&self, credits: u64) -> i64 {
        self.catch_up();
        let credits = i64::try_from(credits).unwrap_or(i64::MAX);
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(credits);
            match self.balance.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Grant one turn's quantum and return the new balance.
    pub fn replenish(&self) -> i64 {
        self.grant(1)
    }

    /// Record the start of a turn. Called on every poll of a task bound by
    /// [`with_budget`].
    pub fn begin_turn(&self) {
        self.turns.fetch_add(1, Ordering::AcqRel);
    }

    /// Credit every turn not yet credited; returns how many were.
    fn catch_up(&self) -> u64 {
        let observed = self.turns.load(Ordering::Acquire);
        let credited = self.credited_turns.fetch_max(observed, Ordering::AcqRel);
        let owed = observed.saturating_sub(credited);
        if owed > 0 {
            self.grant(owed);
        }
        owed
    }

    fn grant(&self, turns: u64) -> i64 {
        let quantum = self.quantum;
        let credit = quantum.saturating_mul(i64::try_from(turns).unwrap_or(i64::MAX));
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(credit).min(quantum);
            match self.balance.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Yield to the scheduler until the balance is non-negative.
    ///
    /// Returns the number of turns given up; zero when nothing was owed.
    pub async fn settle(&self) -> u64 {
        let mut turns = 0;
        while self.is_overdrawn() {
            tokio::task::yield_now().await;
            // Bound tasks see the reschedule as a new turn; unbound ones
            // are credited here.
            if self.catch_up() == 0 {
                self.replenish();
            }
            turns += 1;
        }
        if turns > 0 {
            tracing::trace!(turns, balance = self.remaining(), "execution budget settled");
        }
        turns
    }
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::new(crate::config::BudgetConfig::default().task_quantum)
    }
}

/// Run `future` with `budget` bound as the current task's execution budget.
///
/// Inline dispatches made inside `future` are charged to `budget`.
pub async fn with_budget<F>(budget: Arc<ExecutionBudget>, future: F) -> F::Output
where
    F: Future,
{
    let counter = Arc::clone(&budget);
    let mut future = std::pin::pin!(future);
    let counted = std::future::poll_fn(move |cx| {
        counter.begin_turn();
        future.as_mut().poll(cx)
    });
    TASK_BUDGET.scope(budget, counted).await
}

/// The budget bound to the running task, if any.
pub fn current() -> Option<Arc<ExecutionBudget>> {
    TASK_BUDGET.try_with(Arc::clone).ok()
}
