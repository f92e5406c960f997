//! Checkpoint module for remainder persistence.
//!
//! This module provides the on-disk checkpoint record and the store that
//! saves, loads and removes it, enabling a guarded run to resume after an
//! abort.

pub mod store;

pub use store::{CheckpointStore, DEFAULT_FILE_PREFIX};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The remainder of an aborted run.
///
/// `items` is exactly what the next run under the same name will yield, in
/// order. When `in_flight` is set, `items[0]` is the item that was being
/// processed when the run aborted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<T> {
    /// When this checkpoint was written
    pub created_at: DateTime<Utc>,
    /// Whether the first item was in flight at abort time
    pub in_flight: bool,
    /// Items not yet accounted for
    pub items: Vec<T>,
}

impl<T> Checkpoint<T> {
    /// Create a new checkpoint with the current timestamp.
    pub fn new(in_flight: bool, items: Vec<T>) -> Self {
        Self {
            created_at: Utc::now(),
            in_flight,
            items,
        }
    }

    /// Number of items recorded.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing remains to be processed.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item that was in flight when the run aborted, if any.
    pub fn in_flight_item(&self) -> Option<&T> {
        if self.in_flight {
            self.items.first()
        } else {
            None
        }
    }
}
