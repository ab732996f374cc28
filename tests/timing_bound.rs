//! Wall-clock behaviour with a synthetic primitive of known cost.
//!
//! The `Spin` backend busy-waits one microsecond per input byte, and the
//! calibration table says exactly that, so cost units map 1:1 to
//! microseconds. With that calibration:
//! - inline calls stay within the configured budget times the safety margin
//! - calls above the threshold run off the runtime thread, so a ticker task
//!   on a single-threaded runtime keeps making progress
//! - an overdrawn task budget makes a hot loop of inline calls yield

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_crypto_dispatch::{
    with_budget, CalibrationEntry, CalibrationTable, DispatchError, Dispatcher, DispatcherConfig,
    ExecutionBudget, ExecutionPath, Output, Primitive, PrimitiveBackend,
};

const BUDGET_US: u64 = 20_000;
const MARGIN: f64 = 2.0;

/// Busy-waits `len` microseconds for a `hash` call of `len` bytes.
struct Spin;

impl PrimitiveBackend for Spin {
    fn call(&self, _: Primitive, inputs: &[Vec<u8>]) -> Result<Output, DispatchError> {
        let until = Duration::from_micros(inputs[0].len() as u64);
        let started = Instant::now();
        while started.elapsed() < until {
            std::hint::spin_loop();
        }
        Ok(Output::Bytes(Vec::new()))
    }
}

fn spin_dispatcher(workers: usize, task_quantum: u64) -> Dispatcher {
    let mut config = DispatcherConfig::default();
    config.breakoff.wall_clock_budget_us = BUDGET_US;
    config.breakoff.safety_margin = MARGIN;
    config.offload.pool_size = Some(workers);
    config.budget.task_quantum = task_quantum;
    let table = CalibrationTable::reference()
        .with_entry(Primitive::Hash, CalibrationEntry::new(0.0, 1.0));
    Dispatcher::with_backend(config, table, Arc::new(Spin)).expect("test: dispatcher")
}

#[tokio::test]
async fn test_inline_calls_stay_within_budget_times_margin() {
    let d = spin_dispatcher(1, 100);
    let threshold = d.threshold().cost_units().get();
    assert!((threshold - BUDGET_US as f64 / MARGIN).abs() < 1e-9);

    let bound = Duration::from_micros((BUDGET_US as f64 * MARGIN) as u64);
    let samples = 50usize;
    let mut within = 0;
    for i in 0..samples {
        let len = (threshold as usize) * (i + 1) / samples;
        let args = vec![vec![0u8; len]];
        let route = d.route(Primitive::Hash, &args).expect("test: route");
        assert_eq!(route.path, ExecutionPath::Inline, "len {len} should run inline");

        let started = Instant::now();
        d.invoke(Primitive::Hash, args).await.expect("test: inline call");
        if started.elapsed() <= bound {
            within += 1;
        }
    }
    // Probabilistic: tolerate scheduler noise on a loaded machine.
    assert!(within >= samples - 2, "only {within}/{samples} inline calls within {bound:?}");
    assert_eq!(d.offload_stats().completed, 0);
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_over_threshold_calls_do_not_stall_the_runtime() {
    let d = Arc::new(spin_dispatcher(2, 100));
    let heavy_len = 100_000usize; // 100 ms each, far above the 10 ms threshold
    assert_eq!(
        d.route(Primitive::Hash, &[vec![0u8; heavy_len]])
            .expect("test: route")
            .path,
        ExecutionPath::Offload
    );

    let done = Arc::new(AtomicBool::new(false));
    let max_gap_us = Arc::new(AtomicU64::new(0));
    let ticker = {
        let done = Arc::clone(&done);
        let max_gap_us = Arc::clone(&max_gap_us);
        tokio::spawn(async move {
            let mut last = Instant::now();
            while !done.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let gap = last.elapsed().as_micros() as u64;
                max_gap_us.fetch_max(gap, Ordering::Relaxed);
                last = Instant::now();
            }
        })
    };

    let calls: Vec<_> = (0..4)
        .map(|_| {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.invoke(Primitive::Hash, vec![vec![0u8; heavy_len]]).await })
        })
        .collect();
    for call in calls {
        call.await.expect("test: join").expect("test: offloaded call");
    }
    done.store(true, Ordering::Release);
    ticker.await.expect("test: ticker joins");

    let bound_us = (BUDGET_US as f64 * MARGIN) as u64;
    let gap = max_gap_us.load(Ordering::Relaxed);
    assert!(gap < bound_us, "runtime thread stalled for {gap}us");
    assert_eq!(d.offload_stats().completed, 4);
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_overdrawn_budget_lets_other_tasks_run() {
    let d = Arc::new(spin_dispatcher(1, 100));
    let done = Arc::new(AtomicBool::new(false));
    let ticks = Arc::new(AtomicU64::new(0));

    let ticker = {
        let done = Arc::clone(&done);
        let ticks = Arc::clone(&ticks);
        tokio::spawn(async move {
            while !done.load(Ordering::Acquire) {
                ticks.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        })
    };
    // Let the ticker start.
    tokio::task::yield_now().await;
    let before = ticks.load(Ordering::Relaxed);

    let budget = Arc::new(ExecutionBudget::new(d.config().budget.task_quantum));
    let hot = {
        let d = Arc::clone(&d);
        with_budget(Arc::clone(&budget), async move {
            // Each call costs 2_000 units against a 100-unit quantum.
            for _ in 0..20 {
                d.invoke(Primitive::Hash, vec![vec![0u8; 2_000]])
                    .await
                    .expect("test: inline call");
            }
        })
    };
    hot.await;
    let during = ticks.load(Ordering::Relaxed) - before;
    done.store(true, Ordering::Release);
    ticker.await.expect("test: ticker joins");

    assert!(during >= 20, "ticker advanced only {during} times during the hot loop");
    assert!(!budget.is_overdrawn());
}
