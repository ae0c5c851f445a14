//! Extraction candidates.
//!
//! Attachments point at files already saved in the workspace; URL candidates
//! only become files when they are submitted.

use std::path::PathBuf;

/// A file artifact found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Path of the decoded bytes inside the workspace.
    pub path: PathBuf,

    /// Declared content type of the leaf the file came from.
    pub content_type: String,

    /// The archive this file was expanded from, if any.
    pub archive: Option<PathBuf>,
}

/// A URL found in the message text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlCandidate(pub String);

impl UrlCandidate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The internet-shortcut file submitted to the sandbox for this URL.
    ///
    /// Its bytes are also what the fingerprint is computed over.
    pub fn shortcut_payload(&self) -> String {
        format!("[InternetShortcut]\r\nURL={}\r\n", self.0)
    }
}

/// Anything the submitter may turn into a sandbox task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    File(Attachment),
    Url(UrlCandidate),
}
