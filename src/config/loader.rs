//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`DispatcherConfig`], and run
//! validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Loading calibration tables (that belongs to `calibration`)
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::DispatcherConfig;

/// Load a [`DispatcherConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(DispatcherConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::InvalidField | ConfigError::Validation)` if semantic
///   constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_crypto_dispatch::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("dispatcher.toml"))?;
/// println!("pool size: {}", config.offload.effective_pool_size());
/// ```
pub fn load_from_file(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`DispatcherConfig`] from a TOML string.
///
/// `source_name` identifies the input in error messages.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<DispatcherConfig, ConfigError> {
    let config: DispatcherConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(ConfigError::from_many)?;

    Ok(config)
}
