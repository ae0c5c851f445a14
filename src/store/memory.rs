//! In-process task store with the same insert-or-ignore semantics as SQLite.

use std::sync::Mutex;

use crate::error::{FilterError, Result};
use crate::model::submission::{Fingerprint, InsertOutcome, SubmissionRecord};

use super::TaskStore;

/// Task store backed by a vector, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored records in insertion order.
    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn lock(&self, fingerprint: &Fingerprint) -> Result<std::sync::MutexGuard<'_, Vec<SubmissionRecord>>> {
        self.records.lock().map_err(|_| FilterError::StoreWrite {
            fingerprint: fingerprint.to_string(),
            reason: "memory store lock poisoned".into(),
        })
    }
}

impl TaskStore for MemoryStore {
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self
            .lock(fingerprint)?
            .iter()
            .any(|r| &r.fingerprint == fingerprint))
    }

    fn insert_if_absent(&self, record: &SubmissionRecord) -> Result<InsertOutcome> {
        let mut records = self.lock(&record.fingerprint)?;
        if records.iter().any(|r| r.fingerprint == record.fingerprint) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::submission::Package;

    #[test]
    fn test_second_insert_is_duplicate() {
        let store = MemoryStore::new();
        let fp = Fingerprint::of(b"same bytes");
        let a = SubmissionRecord::new("/spool/1/a.exe", fp.clone(), Package::Executable, "");
        let b = SubmissionRecord::new("/spool/2/b.exe", fp.clone(), Package::Executable, "");
        assert_eq!(store.insert_if_absent(&a).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_if_absent(&b).unwrap(), InsertOutcome::Duplicate);
        assert!(store.contains(&fp).unwrap());
        assert_eq!(store.records(), vec![a]);
    }
}
