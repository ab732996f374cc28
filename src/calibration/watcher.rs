//! Calibration hot-reload watcher.
//!
//! ## Responsibility
//! Watch a calibration TOML file for changes and broadcast validated tables
//! to subscribers. Invalid reloads are logged and rejected; the table in
//! force stays unchanged.
//!
//! ## Guarantees
//! - Only validated tables are broadcast
//! - Invalid file edits are logged but do not disrupt dispatch
//! - File watching is debounced: a reload runs once the file has been quiet
//!   for the debounce window, so the final write of a burst is always applied
//! - The background task ends once the watcher is dropped
//!
//! ## NOT Responsible For
//! - The initial load (use [`CalibrationTable::from_file`])

use std::path::PathBuf;
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::CalibrationTable;
use crate::config::validation::ConfigError;
use crate::dispatcher::Dispatcher;
use crate::metrics;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a calibration file and broadcasts validated replacements.
///
/// Dropping the watcher stops file watching and ends the background task.
///
/// # Panics
///
/// This type never panics.
pub struct CalibrationWatcher {
    tx: broadcast::Sender<CalibrationTable>,
    _watcher: RecommendedWatcher,
}

impl CalibrationWatcher {
    /// Start watching `path`. Must be called inside a Tokio runtime.
    ///
    /// The current content is **not** broadcast; load it with
    /// [`CalibrationTable::from_file`] first.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file watcher cannot be created or the
    /// parent directory cannot be watched.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let (watcher, rx) = CalibrationWatcher::new(PathBuf::from("calibration.toml"))?;
    /// let reload = spawn_calibration_reload(Arc::clone(&dispatcher), rx);
    /// ```
    pub fn new(
        path: PathBuf,
    ) -> Result<(Self, broadcast::Receiver<CalibrationTable>), ConfigError> {
        let (tx, rx) = broadcast::channel(8);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ConfigError::Io {
            file: path.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        // Watch the directory so atomic saves (write temp, rename over) are seen.
        let watch_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Io {
                file: watch_dir.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let task_tx = tx.clone();
        tokio::spawn(async move {
            // A touched file stays pending until it has been quiet for
            // DEBOUNCE, so the last write of a burst is the one read.
            let mut pending = false;
            let mut last_event = Instant::now();

            loop {
                tokio::time::sleep(POLL_INTERVAL).await;

                loop {
                    match notify_rx.try_recv() {
                        Ok(event) => {
                            let touches_file = matches!(
                                event.kind,
                                EventKind::Modify(_) | EventKind::Create(_)
                            ) && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == path.file_name());
                            if touches_file {
                                pending = true;
                                last_event = Instant::now();
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        // Watcher dropped.
                        Err(TryRecvError::Disconnected) => return,
                    }
                }

                if !pending || last_event.elapsed() < DEBOUNCE {
                    continue;
                }
                pending = false;

                match CalibrationTable::from_file(&path) {
                    Ok(table) => {
                        tracing::info!(
                            path = %path.display(),
                            entries = table.len(),
                            "calibration file reloaded"
                        );
                        if task_tx.send(table).is_err() {
                            tracing::debug!(
                                path = %path.display(),
                                "calibration reload dropped; no subscribers"
                            );
                        }
                    }
                    Err(e) => {
                        metrics::inc_calibration_reload("rejected");
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "calibration reload rejected, keeping current table"
                        );
                    }
                }
            }
        });

        Ok((
            Self {
                tx,
                _watcher: watcher,
            },
            rx,
        ))
    }

    /// Another receiver for table updates.
    pub fn subscribe(&self) -> broadcast::Receiver<CalibrationTable> {
        self.tx.subscribe()
    }
}

/// Apply every table received on `rx` to `dispatcher`.
///
/// Runs until the sending side closes. Lagged receivers skip to the newest
/// table, which is the only one that matters.
pub fn spawn_calibration_reload(
    dispatcher: Arc<Dispatcher>,
    mut rx: broadcast::Receiver<CalibrationTable>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(table) => match dispatcher.load_calibration(table) {
                    Ok(()) => metrics::inc_calibration_reload("applied"),
                    Err(e) => {
                        metrics::inc_calibration_reload("rejected");
                        tracing::warn!(error = %e, "calibration update rejected by dispatcher");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "calibration updates coalesced");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
