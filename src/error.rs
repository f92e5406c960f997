//! Error types for the resumable iteration guard.
//!
//! `GuardError` covers every failure the guard itself can introduce. Errors
//! raised by the caller while processing items are never folded into it;
//! they travel back untouched inside [`RunError::Aborted`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the guard, the name registry or the checkpoint store.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The checkpoint name contains characters that cannot be used in a file name.
    #[error("invalid checkpoint name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Another live guard already holds this name.
    #[error("checkpoint name {name:?} is already in use by a live guard")]
    NameConflict { name: String },

    /// Reading, writing or removing the checkpoint file failed.
    #[error("checkpoint storage error at {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stored checkpoint could not be decoded.
    #[error("corrupt checkpoint at {}: {source}", path.display())]
    CorruptCheckpoint {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The checkpoint would not decode back to the same items, so it was not written.
    #[error("checkpoint at {} would not read back unchanged: {reason}", path.display())]
    LossyCheckpoint { path: PathBuf, reason: String },

    /// Configuration could not be loaded.
    #[error("failed to load configuration: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl GuardError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GuardError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors raised while validating or reserving a name.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            GuardError::InvalidName { .. } | GuardError::NameConflict { .. }
        )
    }
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Outcome of a scoped run that did not complete.
///
/// `Aborted` carries the caller's own error exactly as it was returned, after
/// the checkpoint has been written. `SaveFailed` carries the same error when
/// writing the checkpoint failed too. `Guard` means the checkpoint machinery
/// failed on its own (loading on entry, or deleting after a completed run).
#[derive(Debug)]
pub enum RunError<E> {
    /// The checkpoint mechanism failed.
    Guard(GuardError),
    /// The caller's closure returned an error; the remainder was saved.
    Aborted(E),
    /// The caller's closure returned an error and the remainder could not be saved.
    SaveFailed { guard: GuardError, aborted: E },
}

impl<E> RunError<E> {
    /// Returns the caller's error if the run was aborted by it.
    pub fn into_aborted(self) -> Option<E> {
        match self {
            RunError::Aborted(e) | RunError::SaveFailed { aborted: e, .. } => Some(e),
            RunError::Guard(_) => None,
        }
    }

    /// Returns the guard error if the checkpoint mechanism failed.
    pub fn as_guard(&self) -> Option<&GuardError> {
        match self {
            RunError::Guard(e) | RunError::SaveFailed { guard: e, .. } => Some(e),
            RunError::Aborted(_) => None,
        }
    }

    /// Returns true if the remainder of an aborted run was not saved.
    pub fn checkpoint_lost(&self) -> bool {
        matches!(self, RunError::SaveFailed { .. })
    }
}

impl<E> From<GuardError> for RunError<E> {
    fn from(err: GuardError) -> Self {
        RunError::Guard(err)
    }
}

impl<E: fmt::Display> fmt::Display for RunError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Guard(e) => write!(f, "{}", e),
            RunError::Aborted(e) => write!(f, "run aborted: {}", e),
            RunError::SaveFailed { guard, aborted } => {
                write!(f, "run aborted: {} (checkpoint not saved: {})", aborted, guard)
            }
        }
    }
}

impl<E> std::error::Error for RunError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Guard(e) => Some(e),
            RunError::Aborted(e) => Some(e),
            RunError::SaveFailed { guard, .. } => Some(guard),
        }
    }
}
