//! Sandbox task records.

use std::fmt;

use sha2::{Digest, Sha256};

/// Analysis package a submission is run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Package {
    Presentation,
    Spreadsheet,
    Document,
    Pdf,
    Html,
    Script,
    Executable,
    /// Kept on disk but never submitted.
    Skip,
}

impl Package {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presentation => "presentation",
            Self::Spreadsheet => "spreadsheet",
            Self::Document => "document",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Script => "script",
            Self::Executable => "executable",
            Self::Skip => "skip",
        }
    }

    /// `false` for [`Package::Skip`].
    pub fn is_submittable(self) -> bool {
        self != Self::Skip
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex-encoded SHA-256 of an artifact's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the sandbox task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// File the sandbox should analyze.
    pub target: String,
    /// Dedup key; unique across the store.
    pub fingerprint: Fingerprint,
    pub package: Package,
    pub timeout: Option<u32>,
    pub priority: Option<u32>,
    pub custom: Option<String>,
    pub machine_pool: String,
}

impl SubmissionRecord {
    /// A record with no scheduling hints.
    pub fn new(
        target: impl Into<String>,
        fingerprint: Fingerprint,
        package: Package,
        machine_pool: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            fingerprint,
            package,
            timeout: None,
            priority: None,
            custom: None,
            machine_pool: machine_pool.into(),
        }
    }
}

/// Result of an atomic insert-or-ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same fingerprint already exists.
    Duplicate,
}
