//! Resumable iteration with on-disk checkpoints.
//!
//! A [`Guard`] wraps a sequence under a name. If processing aborts partway
//! through, the item being processed and everything after it are saved; the
//! next guard with the same name picks up from there. A run that completes
//! removes the saved state.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod name;
pub mod registry;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::GuardConfig;
pub use error::{GuardError, GuardResult, RunError};
pub use guard::{EmptyAbortPolicy, Guard, GuardState, Outcome, Resumable, Session};
pub use name::CheckpointName;
pub use registry::{NameLease, NameRegistry};
