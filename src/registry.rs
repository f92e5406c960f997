//! Name registry for live guards.
//!
//! At most one live guard may hold a given checkpoint name at a time. The
//! registry is an explicit object rather than process-wide state: whoever
//! orchestrates guard lifetimes owns one and hands it to every guard.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{GuardError, GuardResult};
use crate::name::CheckpointName;

/// Set of checkpoint names currently bound to a live guard.
///
/// Cloning a `NameRegistry` yields another handle to the same set.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    names: Arc<Mutex<HashSet<String>>>,
}

impl NameRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name`, failing if another live guard already holds it.
    ///
    /// The returned lease releases the name when dropped.
    pub fn reserve(&self, name: &CheckpointName) -> GuardResult<NameLease> {
        let mut names = self.lock();
        if !names.insert(name.as_str().to_string()) {
            return Err(GuardError::NameConflict {
                name: name.to_string(),
            });
        }
        debug!(name = %name, "reserved checkpoint name");

        Ok(NameLease {
            registry: self.clone(),
            name: name.clone(),
        })
    }

    /// Removes `name` from the registry. Releasing an absent name is a no-op.
    pub fn release(&self, name: &str) {
        if self.lock().remove(name) {
            debug!(name, "released checkpoint name");
        }
    }

    /// Returns true if `name` is currently held.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    /// Number of names currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no names are held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Each mutation is a single insert or remove, so a poisoned set is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A held reservation. The name is released when the lease is dropped.
#[derive(Debug)]
pub struct NameLease {
    registry: NameRegistry,
    name: CheckpointName,
}

impl NameLease {
    /// The reserved name.
    pub fn name(&self) -> &CheckpointName {
        &self.name
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        self.registry.release(self.name.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> CheckpointName {
        CheckpointName::parse(s).unwrap()
    }

    #[test]
    fn test_reserve_and_release() {
        let registry = NameRegistry::new();
        assert!(registry.is_empty());

        let lease = registry.reserve(&name("jobs")).unwrap();
        assert!(registry.is_reserved("jobs"));
        assert_eq!(lease.name().as_str(), "jobs");

        drop(lease);
        assert!(!registry.is_reserved("jobs"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_reservation_conflicts() {
        let registry = NameRegistry::new();
        let _lease = registry.reserve(&name("jobs")).unwrap();

        let err = registry.reserve(&name("jobs")).unwrap_err();
        assert!(matches!(err, GuardError::NameConflict { ref name } if name == "jobs"));
    }

    #[test]
    fn test_distinct_names_coexist() {
        let registry = NameRegistry::new();
        let _a = registry.reserve(&name("a")).unwrap();
        let _b = registry.reserve(&name("b")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_unregistered_is_noop() {
        let registry = NameRegistry::new();
        registry.release("never-reserved");
        registry.release("never-reserved");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_name_reusable_after_release() {
        let registry = NameRegistry::new();
        let lease = registry.reserve(&name("jobs")).unwrap();
        drop(lease);
        assert!(registry.reserve(&name("jobs")).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = NameRegistry::new();
        let other = registry.clone();
        let _lease = registry.reserve(&name("shared")).unwrap();
        assert!(other.is_reserved("shared"));
        assert!(other.reserve(&name("shared")).is_err());
    }

    #[test]
    fn test_manual_release_then_lease_drop() {
        let registry = NameRegistry::new();
        let lease = registry.reserve(&name("jobs")).unwrap();
        registry.release("jobs");
        assert!(!registry.is_reserved("jobs"));
        // The lease's own release must not fail on an already-released name.
        drop(lease);
        assert!(registry.is_empty());
    }
}
