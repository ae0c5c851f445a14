//! Turn candidates into sandbox tasks, at most once per fingerprint.

use tracing::info;

use crate::deadline::Deadline;
use crate::error::{FilterError, Result};
use crate::model::attachment::Candidate;
use crate::model::submission::{Fingerprint, InsertOutcome, SubmissionRecord};
use crate::store::TaskStore;
use crate::submit::classify::classify;
use crate::workspace::Workspace;

/// What happened to the candidates of one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmissionSummary {
    /// Records inserted by this run.
    pub submitted: Vec<SubmissionRecord>,
    /// Candidates whose fingerprint was already queued.
    pub duplicates: usize,
    /// Candidates classified as not worth analyzing.
    pub skipped: usize,
}

/// Fingerprints, classifies and queues candidates.
pub struct Submitter<'a, S> {
    store: S,
    workspace: &'a Workspace,
    machine_pool: &'a str,
    urls_written: usize,
}

impl<'a, S: TaskStore> Submitter<'a, S> {
    pub fn new(store: S, workspace: &'a Workspace, machine_pool: &'a str) -> Self {
        Self {
            store,
            workspace,
            machine_pool,
            urls_written: 0,
        }
    }

    /// Submit every candidate in order, checking `deadline` before each.
    pub fn submit_all(&mut self, candidates: &[Candidate], deadline: &Deadline) -> Result<SubmissionSummary> {
        let mut summary = SubmissionSummary::default();
        for candidate in candidates {
            deadline.check("submit")?;
            self.submit(candidate, &mut summary)?;
        }
        info!(
            submitted = summary.submitted.len(),
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "Submission finished"
        );
        Ok(summary)
    }

    fn submit(&mut self, candidate: &Candidate, summary: &mut SubmissionSummary) -> Result<()> {
        let (data, label) = match candidate {
            Candidate::File(att) => {
                let data = std::fs::read(&att.path).map_err(|e| FilterError::workspace(&att.path, e))?;
                (data, att.path.display().to_string())
            }
            Candidate::Url(url) => (url.shortcut_payload().into_bytes(), url.as_str().to_string()),
        };
        let fingerprint = Fingerprint::of(&data);

        if self.store.contains(&fingerprint)? {
            info!(%fingerprint, target = %label, "Already scanned, skipping");
            summary.duplicates += 1;
            return Ok(());
        }

        let package = classify(&data);
        if !package.is_submittable() {
            info!(%fingerprint, target = %label, "Content not worth analyzing, not submitted");
            summary.skipped += 1;
            return Ok(());
        }

        let target = match candidate {
            Candidate::File(att) => att.path.to_string_lossy().to_string(),
            Candidate::Url(_) => {
                self.urls_written += 1;
                let name = format!("url-{}.url", self.urls_written);
                let path = self.workspace.write_file(self.workspace.path(), &name, &data)?;
                path.to_string_lossy().to_string()
            }
        };

        let record = SubmissionRecord::new(target, fingerprint, package, self.machine_pool);
        match self.store.insert_if_absent(&record)? {
            InsertOutcome::Inserted => {
                info!(
                    fingerprint = %record.fingerprint,
                    target = %record.target,
                    package = %record.package,
                    "Submitted to sandbox"
                );
                summary.submitted.push(record);
            }
            InsertOutcome::Duplicate => {
                // Lost a race with a concurrent invocation; same as a lookup hit.
                info!(fingerprint = %record.fingerprint, target = %label, "Already scanned, skipping");
                summary.duplicates += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attachment::{Attachment, UrlCandidate};
    use crate::model::submission::Package;
    use crate::store::MemoryStore;

    fn setup() -> (tempfile::TempDir, Workspace) {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        (root, ws)
    }

    fn file(ws: &Workspace, name: &str, data: &[u8]) -> Candidate {
        Candidate::File(Attachment {
            path: ws.write_file(ws.path(), name, data).unwrap(),
            content_type: "application/octet-stream".into(),
            archive: None,
        })
    }

    #[test]
    fn test_identical_bytes_collapse_to_one_record() {
        let (_root, ws) = setup();
        let store = MemoryStore::new();
        let candidates = vec![file(&ws, "a.exe", b"MZ same"), file(&ws, "renamed.scr", b"MZ same")];
        let summary = Submitter::new(&store, &ws, "pool")
            .submit_all(&candidates, &Deadline::unlimited())
            .unwrap();
        assert_eq!(summary.submitted.len(), 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].machine_pool, "pool");
        assert_eq!(store.records()[0].priority, None);
    }

    #[test]
    fn test_skip_package_is_never_stored() {
        let (_root, ws) = setup();
        let store = MemoryStore::new();
        let candidates = vec![file(&ws, "fix.patch", b"--- a/x\n+++ b/x\n@@ -1 +1 @@\n")];
        let summary = Submitter::new(&store, &ws, "")
            .submit_all(&candidates, &Deadline::unlimited())
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_url_written_as_shortcut_and_fingerprinted_over_payload() {
        let (_root, ws) = setup();
        let store = MemoryStore::new();
        let url = UrlCandidate("https://evil.example.net/login".to_string());
        let expected = Fingerprint::of(url.shortcut_payload().as_bytes());
        let summary = Submitter::new(&store, &ws, "")
            .submit_all(&[Candidate::Url(url.clone())], &Deadline::unlimited())
            .unwrap();

        let record = &summary.submitted[0];
        assert_eq!(record.fingerprint, expected);
        assert_eq!(record.package, Package::Html);
        assert!(record.target.ends_with("url-1.url"));
        assert_eq!(std::fs::read_to_string(&record.target).unwrap(), url.shortcut_payload());
    }

    #[test]
    fn test_store_hit_skips_classification() {
        let (_root, ws) = setup();
        let store = MemoryStore::new();
        let data = b"%PDF-1.4 already seen";
        store
            .insert_if_absent(&SubmissionRecord::new("/old", Fingerprint::of(data), Package::Pdf, ""))
            .unwrap();
        let summary = Submitter::new(&store, &ws, "")
            .submit_all(&[file(&ws, "again.pdf", data)], &Deadline::unlimited())
            .unwrap();
        assert_eq!(summary.duplicates, 1);
        assert!(summary.submitted.is_empty());
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_expired_deadline_stops_submission() {
        let (_root, ws) = setup();
        let store = MemoryStore::new();
        let err = Submitter::new(&store, &ws, "")
            .submit_all(&[file(&ws, "a.pdf", b"%PDF-")], &Deadline::start(Some(std::time::Duration::ZERO)))
            .unwrap_err();
        assert!(matches!(err, FilterError::Timeout(_)));
        assert!(store.records().is_empty());
    }
}
