//! Sandbox task queue access.
//!
//! The pipeline only needs two operations, and dedup relies on the second
//! being atomic: two invocations racing on the same fingerprint must end up
//! with one row, and the loser sees [`InsertOutcome::Duplicate`].

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::model::submission::{Fingerprint, InsertOutcome, SubmissionRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A persistent, shared store of sandbox tasks keyed by fingerprint.
pub trait TaskStore {
    /// `true` if a task with this fingerprint was already queued.
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Insert `record` unless its fingerprint is already present.
    fn insert_if_absent(&self, record: &SubmissionRecord) -> Result<InsertOutcome>;
}

impl<T: TaskStore + ?Sized> TaskStore for &T {
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        (**self).contains(fingerprint)
    }

    fn insert_if_absent(&self, record: &SubmissionRecord) -> Result<InsertOutcome> {
        (**self).insert_if_absent(record)
    }
}
