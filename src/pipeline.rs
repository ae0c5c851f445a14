//! One filter run: ingest, extract, submit, deliver.
//!
//! Failure policy:
//! - Any error before delivery aborts the run without delivering. Every such
//!   error is temporary, so the MTA requeues the message and the next run
//!   starts from scratch; fingerprint dedup keeps the resubmission idempotent.
//!   This includes an unreachable task store (fail closed).
//! - The workspace is removed when the run fails before anything could have
//!   been queued, and after delivery when the message had no candidates.
//!   Otherwise it is kept for the sandbox and later removed by the sweep.

use std::io::Read;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::Config;
use crate::deadline::Deadline;
use crate::delivery::{self, Transport};
use crate::error::Result;
use crate::extract::urls::extract_urls;
use crate::extract::walker::collect_attachments;
use crate::model::attachment::Candidate;
use crate::parser::mime::ingest;
use crate::store::TaskStore;
use crate::submit::submitter::{SubmissionSummary, Submitter};
use crate::workspace::Workspace;

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct Report {
    /// The workspace used by this run.
    pub workspace: PathBuf,
    /// File candidates found (after ignore-list filtering and archive expansion).
    pub attachments: usize,
    /// URL candidates found.
    pub urls: usize,
    pub summary: SubmissionSummary,
    /// `false` when the workspace was removed after delivery.
    pub workspace_retained: bool,
}

impl Report {
    pub fn candidates(&self) -> usize {
        self.attachments + self.urls
    }
}

/// Process one message read from `input`.
///
/// `connect` is only called when the message has candidates, so mail without
/// attachments is delivered even while the task store is down.
pub fn run<S, C>(
    config: &Config,
    input: &mut dyn Read,
    transport_args: &[String],
    connect: C,
    transport: &dyn Transport,
    deadline: Deadline,
) -> Result<Report>
where
    S: TaskStore,
    C: FnOnce() -> Result<S>,
{
    let workspace = Workspace::create(&config.workspace.root)?;

    let candidates = match extract_candidates(config, &workspace, input, transport_args, &deadline) {
        Ok(candidates) => candidates,
        Err(e) => {
            discard(workspace);
            return Err(e);
        }
    };
    let attachments = candidates
        .iter()
        .filter(|c| matches!(c, Candidate::File(_)))
        .count();
    let urls = candidates.len() - attachments;

    let summary = if candidates.is_empty() {
        SubmissionSummary::default()
    } else {
        let store = match connect() {
            Ok(store) => store,
            Err(e) => {
                discard(workspace);
                return Err(e);
            }
        };
        Submitter::new(store, &workspace, &config.sandbox.machine_pool).submit_all(&candidates, &deadline)?
    };

    let delivered = deadline
        .check("deliver")
        .and_then(|()| delivery::deliver(&workspace, transport));
    if let Err(e) = delivered {
        if candidates.is_empty() {
            discard(workspace);
        }
        return Err(e);
    }

    let path = workspace.path().to_path_buf();
    let workspace_retained = if candidates.is_empty() {
        // Delivery already happened, so a cleanup failure must not fail the run.
        discard(workspace);
        false
    } else {
        info!(path = %path.display(), "Workspace retained for sandbox analysis");
        true
    };

    Ok(Report {
        workspace: path,
        attachments,
        urls,
        summary,
        workspace_retained,
    })
}

fn extract_candidates(
    config: &Config,
    workspace: &Workspace,
    input: &mut dyn Read,
    transport_args: &[String],
    deadline: &Deadline,
) -> Result<Vec<Candidate>> {
    let message = ingest(workspace, input, transport_args)?;
    deadline.check("extract")?;

    let attachments = collect_attachments(&config.filter, workspace, &message.tree)?;
    let urls = if config.filter.process_urls {
        extract_urls(&message.raw, &config.filter.url_exclusions()?)
    } else {
        Vec::new()
    };
    info!(
        attachments = attachments.len(),
        urls = urls.len(),
        "Extracted candidates"
    );

    Ok(attachments
        .into_iter()
        .map(Candidate::File)
        .chain(urls.into_iter().map(Candidate::Url))
        .collect())
}

/// Remove a workspace, logging instead of failing.
fn discard(workspace: Workspace) {
    let path = workspace.path().to_path_buf();
    if let Err(e) = workspace.remove() {
        warn!(path = %path.display(), error = %e, "Failed to remove workspace");
    }
}
