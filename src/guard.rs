//! Resumable iteration guard.
//!
//! A [`Guard`] binds a checkpoint name to a source sequence. When the guard
//! is entered it resumes from a stored checkpoint if one exists, otherwise it
//! iterates the source. Every item handed out is remembered as the in-flight
//! item until the next one is requested. If the scope aborts, the in-flight
//! item and everything not yet produced are written to the checkpoint store;
//! if it completes, any stored checkpoint is deleted.
//!
//! ```no_run
//! use resumable::{CheckpointStore, Guard, NameRegistry};
//!
//! let registry = NameRegistry::new();
//! let store = CheckpointStore::new("/var/lib/myapp/checkpoints")?;
//! let urls = vec!["https://a.example".to_string(), "https://b.example".to_string()];
//!
//! let result = Guard::new(&registry, store, "fetch-urls", urls)?.run(|items| {
//!     for url in items {
//!         if url.is_empty() {
//!             return Err("empty url".to_string());
//!         }
//!     }
//!     Ok(())
//! });
//! # let _ = result;
//! # Ok::<(), resumable::GuardError>(())
//! ```

use std::fmt;
use std::iter::FusedIterator;
use std::panic::{self, AssertUnwindSafe};
use std::vec;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::GuardConfig;
use crate::error::{GuardResult, RunError};
use crate::name::CheckpointName;
use crate::registry::{NameLease, NameRegistry};

/// What to do when a run aborts with nothing left to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyAbortPolicy {
    /// Write nothing, and remove any stale checkpoint for the name.
    #[default]
    Skip,
    /// Write an empty checkpoint.
    Persist,
}

/// Where a [`Resumable`] iterator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Iterating the original source; nothing yielded yet.
    Fresh,
    /// Iterating a loaded checkpoint; nothing yielded yet.
    Resumed,
    /// At least one item has been handed out.
    Draining,
    /// The basis reported its end.
    Exhausted,
    /// The basis panicked while producing an item and cannot be pulled again.
    Faulted,
}

/// How a scope ended, for [`Session::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The scope finished normally.
    Completed,
    /// The scope was left because of a failure.
    Aborted,
}

/// A checkpoint name bound to a source sequence.
///
/// Construction validates and reserves the name; the name stays reserved
/// until the guard is finished through [`Guard::run`] or [`Session::end`]
/// (or dropped).
#[derive(Debug)]
pub struct Guard<I: Iterator> {
    lease: NameLease,
    store: CheckpointStore,
    source: I,
    empty_abort: EmptyAbortPolicy,
}

impl<I> Guard<I>
where
    I: Iterator,
    I::Item: Clone + PartialEq + Serialize + DeserializeOwned,
{
    /// Create a guard over `source` under `name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name contains disallowed characters, and
    /// `NameConflict` if another live guard in `registry` holds it.
    pub fn new<S>(
        registry: &NameRegistry,
        store: CheckpointStore,
        name: &str,
        source: S,
    ) -> GuardResult<Self>
    where
        S: IntoIterator<IntoIter = I>,
    {
        let name = CheckpointName::parse(name)?;
        let lease = registry.reserve(&name)?;

        Ok(Self {
            lease,
            store,
            source: source.into_iter(),
            empty_abort: EmptyAbortPolicy::default(),
        })
    }

    /// Create a guard whose store and abort policy come from `config`.
    pub fn from_config<S>(
        registry: &NameRegistry,
        config: &GuardConfig,
        name: &str,
        source: S,
    ) -> GuardResult<Self>
    where
        S: IntoIterator<IntoIter = I>,
    {
        let name = CheckpointName::parse(name)?;
        let store = config.open_store()?;
        let lease = registry.reserve(&name)?;

        Ok(Self {
            lease,
            store,
            source: source.into_iter(),
            empty_abort: config.empty_abort,
        })
    }

    /// Set the policy for aborts that leave nothing to record.
    pub fn with_empty_abort(mut self, policy: EmptyAbortPolicy) -> Self {
        self.empty_abort = policy;
        self
    }

    /// The checkpoint name this guard holds.
    pub fn name(&self) -> &CheckpointName {
        self.lease.name()
    }

    /// Enter the guarded scope.
    ///
    /// If a checkpoint exists for the name, its items replace the source;
    /// the source is then dropped without being read.
    ///
    /// # Errors
    ///
    /// Returns `StorageIo` or `CorruptCheckpoint` if a stored checkpoint
    /// cannot be loaded. Only a missing checkpoint starts a fresh run. The
    /// name is released on error.
    pub fn begin(self) -> GuardResult<Session<I>> {
        let Guard {
            lease,
            store,
            source,
            empty_abort,
        } = self;

        let stored: Option<Checkpoint<I::Item>> = store.load_if_present(lease.name())?;
        let (basis, origin) = if let Some(checkpoint) = stored {
            info!(
                name = %lease.name(),
                items = checkpoint.items.len(),
                in_flight = checkpoint.in_flight,
                "resuming from checkpoint"
            );
            (
                Basis::Checkpoint(checkpoint.items.into_iter()),
                GuardState::Resumed,
            )
        } else {
            debug!(name = %lease.name(), "no checkpoint found, starting from source");
            (Basis::Source(source), GuardState::Fresh)
        };

        Ok(Session {
            name: lease.name().clone(),
            iter: Resumable::new(basis, origin),
            finalizer: Some(Finalizer {
                lease,
                store,
                empty_abort,
            }),
        })
    }

    /// Run `f` over the resumable sequence inside the guarded scope.
    ///
    /// If `f` returns `Ok`, any checkpoint for the name is deleted. If it
    /// returns `Err`, the remainder is saved and the error is handed back
    /// unchanged as [`RunError::Aborted`]; if that save fails, both errors
    /// come back as [`RunError::SaveFailed`]. If `f` panics, the remainder is
    /// saved and the panic continues with its original payload.
    pub fn run<R, E, F>(self, f: F) -> Result<R, RunError<E>>
    where
        F: FnOnce(&mut Resumable<I>) -> Result<R, E>,
    {
        let mut session = self.begin()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut session.iter)));

        match outcome {
            Ok(Ok(value)) => {
                session.end(Outcome::Completed)?;
                Ok(value)
            }
            Ok(Err(err)) => match session.end(Outcome::Aborted) {
                Ok(()) => Err(RunError::Aborted(err)),
                Err(guard) => Err(RunError::SaveFailed {
                    guard,
                    aborted: err,
                }),
            },
            Err(payload) => {
                if let Err(e) = session.end(Outcome::Aborted) {
                    error!(error = %e, "failed to save checkpoint after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

/// The sequence currently being drained.
enum Basis<I: Iterator> {
    Source(I),
    Checkpoint(vec::IntoIter<I::Item>),
}

impl<I: Iterator> Basis<I> {
    fn next(&mut self) -> Option<I::Item> {
        match self {
            Basis::Source(it) => it.next(),
            Basis::Checkpoint(it) => it.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Basis::Source(it) => it.size_hint(),
            Basis::Checkpoint(it) => it.size_hint(),
        }
    }
}

/// Items not yet accounted for when a scope aborts.
#[derive(Debug)]
struct Remainder<T> {
    in_flight: bool,
    items: Vec<T>,
}

/// Lazy, forward-only, single-pass view over the basis sequence.
///
/// Each item is recorded as in flight before it is returned, so a failure
/// while processing it attributes the failure to that exact item.
pub struct Resumable<I: Iterator> {
    basis: Basis<I>,
    origin: GuardState,
    last_started: Option<I::Item>,
    yielded: usize,
    producing: bool,
    exhausted: bool,
}

impl<I: Iterator> Resumable<I> {
    fn new(basis: Basis<I>, origin: GuardState) -> Self {
        Self {
            basis,
            origin,
            last_started: None,
            yielded: 0,
            producing: false,
            exhausted: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GuardState {
        if self.producing {
            GuardState::Faulted
        } else if self.exhausted {
            GuardState::Exhausted
        } else if self.yielded > 0 {
            GuardState::Draining
        } else {
            self.origin
        }
    }

    /// Returns true if items come from a stored checkpoint.
    pub fn is_resumed(&self) -> bool {
        self.origin == GuardState::Resumed
    }

    /// The item most recently handed out, while it is still in flight.
    pub fn last_started(&self) -> Option<&I::Item> {
        self.last_started.as_ref()
    }

    /// Number of items handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    // A panic inside the producer leaves `producing` set; such a basis is never pulled again.
    fn take_remainder(&mut self) -> Remainder<I::Item> {
        let in_flight = self.last_started.take();
        let mut items: Vec<I::Item> = in_flight.into_iter().collect();
        let in_flight = !items.is_empty();

        if self.producing {
            warn!(
                yielded = self.yielded,
                "source faulted while producing an item, recording in-flight item only"
            );
        } else if !self.exhausted {
            loop {
                match panic::catch_unwind(AssertUnwindSafe(|| self.basis.next())) {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            captured = items.len(),
                            "source faulted while draining remainder"
                        );
                        break;
                    }
                }
            }
        }
        self.exhausted = true;

        Remainder { in_flight, items }
    }
}

impl<I> Iterator for Resumable<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if self.exhausted || self.producing {
            return None;
        }

        self.producing = true;
        let next = self.basis.next();
        self.producing = false;

        match next {
            Some(item) => {
                self.last_started = Some(item.clone());
                self.yielded += 1;
                Some(item)
            }
            None => {
                // Asking past the last item means the last item was handled.
                self.last_started = None;
                self.exhausted = true;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted || self.producing {
            (0, Some(0))
        } else {
            self.basis.size_hint()
        }
    }
}

impl<I> FusedIterator for Resumable<I>
where
    I: Iterator,
    I::Item: Clone,
{
}

impl<I: Iterator> fmt::Debug for Resumable<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumable")
            .field("state", &self.state())
            .field("yielded", &self.yielded)
            .field("in_flight", &self.last_started.is_some())
            .finish_non_exhaustive()
    }
}

/// Exit-time bookkeeping owned by a live session.
#[derive(Debug)]
struct Finalizer {
    lease: NameLease,
    store: CheckpointStore,
    empty_abort: EmptyAbortPolicy,
}

impl Finalizer {
    fn complete(self) -> GuardResult<()> {
        let name = self.lease.name();
        if self.store.exists(name) {
            self.store.delete(name)?;
            info!(name = %name, "run completed, removed checkpoint");
        } else {
            debug!(name = %name, "run completed");
        }
        Ok(())
    }

    fn abort<I>(self, iter: &mut Resumable<I>) -> GuardResult<()>
    where
        I: Iterator,
        I::Item: PartialEq + Serialize + DeserializeOwned,
    {
        let name = self.lease.name();
        let remainder = iter.take_remainder();

        if remainder.items.is_empty() && self.empty_abort == EmptyAbortPolicy::Skip {
            warn!(name = %name, "run aborted with nothing left to record");
            return self.store.delete(name);
        }

        let checkpoint = Checkpoint::new(remainder.in_flight, remainder.items);
        self.store.save(name, &checkpoint)?;
        warn!(
            name = %name,
            items = checkpoint.items.len(),
            in_flight = checkpoint.in_flight,
            path = %self.store.path_for(name).display(),
            "run aborted, checkpoint written"
        );
        Ok(())
    }
}

/// A live guarded scope: the explicit `begin`/`end` form of [`Guard::run`].
///
/// Iterate the session to receive items, then call [`Session::end`] with
/// the outcome. A session dropped without `end` is treated as aborted; save
/// errors on that path can only be logged. A source that panics while its
/// remainder is drained during an unwind aborts the process, so prefer
/// [`Guard::run`] for sources that may panic.
pub struct Session<I>
where
    I: Iterator,
    I::Item: Clone + PartialEq + Serialize + DeserializeOwned,
{
    name: CheckpointName,
    iter: Resumable<I>,
    finalizer: Option<Finalizer>,
}

impl<I> Session<I>
where
    I: Iterator,
    I::Item: Clone + PartialEq + Serialize + DeserializeOwned,
{
    /// The checkpoint name held by this session.
    pub fn name(&self) -> &CheckpointName {
        &self.name
    }

    /// The underlying resumable iterator.
    pub fn items(&mut self) -> &mut Resumable<I> {
        &mut self.iter
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GuardState {
        self.iter.state()
    }

    /// The item most recently handed out, while it is still in flight.
    pub fn last_started(&self) -> Option<&I::Item> {
        self.iter.last_started()
    }

    /// Leave the scope.
    ///
    /// `Completed` deletes any checkpoint for the name; `Aborted` saves the
    /// remainder. The name is released either way.
    pub fn end(mut self, outcome: Outcome) -> GuardResult<()> {
        self.finish(outcome)
    }

    fn finish(&mut self, outcome: Outcome) -> GuardResult<()> {
        let Some(finalizer) = self.finalizer.take() else {
            return Ok(());
        };
        match outcome {
            Outcome::Completed => finalizer.complete(),
            Outcome::Aborted => finalizer.abort(&mut self.iter),
        }
    }
}

impl<I> Iterator for Session<I>
where
    I: Iterator,
    I::Item: Clone + PartialEq + Serialize + DeserializeOwned,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<I> fmt::Debug for Session<I>
where
    I: Iterator,
    I::Item: Clone + PartialEq + Serialize + DeserializeOwned,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("open", &self.finalizer.is_some())
            .finish_non_exhaustive()
    }
}

impl<I> Drop for Session<I>
where
    I: Iterator,
    I::Item: Clone + PartialEq + Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if self.finalizer.is_none() {
            return;
        }
        if let Err(e) = self.finish(Outcome::Aborted) {
            error!(error = %e, "failed to save checkpoint for dropped session");
        }
    }
}
