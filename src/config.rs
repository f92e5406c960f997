//! Guard configuration.
//!
//! Settings can come from a TOML file, from `RESUMABLE__*` environment
//! variables, or both. Nothing here is required: the guard API takes explicit
//! values, and this layer only saves host applications from wiring them by hand.

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::checkpoint::{CheckpointStore, DEFAULT_FILE_PREFIX};
use crate::error::GuardResult;
use crate::guard::EmptyAbortPolicy;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "RESUMABLE";

/// Directory name used under the platform data directory.
const APP_DIR_NAME: &str = "resumable";

/// Settings shared by every guard built from this configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Directory holding checkpoint files. Defaults to the platform's local data dir.
    pub base_dir: Option<PathBuf>,
    /// Prefix prepended to every checkpoint file name.
    pub file_prefix: String,
    /// What to do when a run aborts with nothing left to record.
    pub empty_abort: EmptyAbortPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            empty_abort: EmptyAbortPolicy::default(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a TOML file, with environment overrides.
    ///
    /// Environment variables use the format `RESUMABLE__<KEY>`
    /// (e.g., `RESUMABLE__EMPTY_ABORT=persist`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use resumable::GuardConfig;
    ///
    /// let config = GuardConfig::load("resumable.toml")?;
    /// # Ok::<(), resumable::GuardError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> GuardResult<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(env_source())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> GuardResult<Self> {
        let config = Config::builder().add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Set the checkpoint directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Set the empty-abort policy.
    pub fn with_empty_abort(mut self, policy: EmptyAbortPolicy) -> Self {
        self.empty_abort = policy;
        self
    }

    /// The directory checkpoints will be stored in.
    ///
    /// Falls back to `<data_local_dir>/resumable`, then `<temp_dir>/resumable`.
    pub fn resolve_base_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR_NAME),
        }
    }

    /// Open the checkpoint store described by this configuration.
    pub fn open_store(&self) -> GuardResult<CheckpointStore> {
        CheckpointStore::with_prefix(self.resolve_base_dir(), self.file_prefix.clone())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
