//! Demo binary for tokio-crypto-dispatch
//!
//! Runs a handful of primitive calls through the dispatcher and logs which
//! path each one took.
//!
//! ```text
//! crypto-dispatch-demo [dispatcher.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (overrides the config file)
//! - `RUST_LOG=debug`: log every routing decision

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_crypto_dispatch::config::loader::load_from_file;
use tokio_crypto_dispatch::registry::sizes::{KEY_BYTES, NONCE_BYTES};
use tokio_crypto_dispatch::{
    init_tracing, init_tracing_with, metrics, spawn_calibration_reload, with_budget,
    CalibrationWatcher, Dispatcher, DispatcherConfig, ExecutionBudget, Output, Primitive,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_from_file(&PathBuf::from(path))?,
        None => DispatcherConfig::default(),
    };

    if std::env::var_os("LOG_FORMAT").is_some() {
        let _ = init_tracing();
    } else {
        let _ = init_tracing_with(config.observability.log_format);
    }
    metrics::init_metrics()?;

    let watch_path = config
        .calibration
        .watch
        .then(|| config.calibration.path.clone())
        .flatten();
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    info!(
        threshold = %dispatcher.threshold(),
        workers = dispatcher.offload_stats().workers,
        "dispatcher started"
    );

    // Keep the watcher alive for the lifetime of the demo.
    let _watcher = match watch_path {
        Some(path) => {
            let (watcher, rx) = CalibrationWatcher::new(path)?;
            spawn_calibration_reload(Arc::clone(&dispatcher), rx);
            Some(watcher)
        }
        None => None,
    };

    let key = vec![0x42; KEY_BYTES];
    let nonce = vec![0x24; NONCE_BYTES];

    // Small and large secretbox: same primitive, different paths, same bytes.
    let budget = Arc::new(ExecutionBudget::new(dispatcher.config().budget.task_quantum));
    let d = Arc::clone(&dispatcher);
    let (k, n) = (key.clone(), nonce.clone());
    with_budget(Arc::clone(&budget), async move {
        for len in [1_024usize, 4 * 1024 * 1024] {
            let args = vec![vec![0x61; len], n.clone(), k.clone()];
            let route = d.route(Primitive::Secretbox, &args)?;
            let started = Instant::now();
            let sealed = d.invoke(Primitive::Secretbox, args).await?;
            info!(
                len,
                path = %route.path,
                cost = %route.cost,
                elapsed_us = started.elapsed().as_micros() as u64,
                out_len = sealed.as_bytes().map_or(0, |b| b.len()),
                "secretbox"
            );
        }
        Ok::<_, tokio_crypto_dispatch::DispatchError>(())
    })
    .await?;
    info!(balance = budget.remaining(), "task budget after secretbox calls");

    // Wrong key: a verification failure is a value, not an error.
    let sealed = dispatcher
        .invoke(
            Primitive::Secretbox,
            vec![b"attack at dawn".to_vec(), nonce.clone(), key.clone()],
        )
        .await?;
    if let Some(ciphertext) = sealed.into_bytes() {
        let opened = dispatcher
            .invoke(
                Primitive::SecretboxOpen,
                vec![ciphertext, nonce.clone(), vec![0x00; KEY_BYTES]],
            )
            .await?;
        info!(
            verification_failed = opened == Output::VerificationFailed,
            "secretbox_open with the wrong key"
        );
    }

    // Signing round trip by string identifier.
    if let Output::KeyPair { public, secret } =
        dispatcher.invoke_named("sign_keypair", vec![]).await?
    {
        let signed = dispatcher
            .invoke_named("sign", vec![b"release v1".to_vec(), secret.to_vec()])
            .await?;
        if let Some(signed) = signed.into_bytes() {
            let opened = dispatcher.invoke_named("sign_open", vec![signed, public]).await?;
            info!(valid = opened.as_bytes() == Some(&b"release v1"[..]), "sign_open");
        }
    }

    // Concurrent large hashes all go to the offload pool.
    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let d = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move {
            d.invoke(Primitive::Hash, vec![vec![i; 2 * 1024 * 1024]]).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let stats = dispatcher.offload_stats();
    info!(
        completed = stats.completed,
        cancelled = stats.cancelled,
        faults = stats.faults,
        "offload pool"
    );
    let summary = metrics::get_metrics_summary();
    for (key, count) in &summary.invocations {
        info!(route = %key, count, "invocations");
    }

    dispatcher.shutdown().await?;
    info!("demo complete");
    Ok(())
}
