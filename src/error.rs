//! Centralized error types for sandfilter.
//!
//! Every failure the pipeline can hit is a variant of [`FilterError`]. The
//! binary turns it into one of the two exit codes the MTA understands.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// `EX_TEMPFAIL` from `sysexits.h`: the MTA requeues the message.
pub const EX_TEMPFAIL: u8 = 75;

/// `EX_UNAVAILABLE` from `sysexits.h`: the MTA bounces the message.
pub const EX_UNAVAILABLE: u8 = 69;

/// All errors produced by the sandfilter library.
#[derive(Error, Debug)]
pub enum FilterError {
    /// The configuration could not be read or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The per-message workspace could not be created or written.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The input is not a well-formed message.
    #[error("Message parse error: {0}")]
    Parse(String),

    /// An archive attachment could not be expanded.
    #[error("Failed to expand archive '{path}': {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// The sandbox task store could not be opened.
    #[error("Cannot connect to task store '{location}': {reason}")]
    StoreConnect { location: String, reason: String },

    /// The sandbox task store rejected a lookup or insert.
    #[error("Task store write failed for {fingerprint}: {reason}")]
    StoreWrite { fingerprint: String, reason: String },

    /// The saved message or transport arguments could not be read back.
    #[error("Cannot read back saved message state '{path}': {source}")]
    DeliveryRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The outbound transport could not be started or fed.
    #[error("Cannot run transport '{path}': {source}")]
    TransportSpawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The outbound transport ran but reported failure.
    #[error("Transport '{path}' exited with {status}")]
    TransportStatus { path: PathBuf, status: String },

    /// The processing deadline passed before the pipeline finished.
    #[error("Processing deadline of {0:?} exceeded")]
    Timeout(Duration),
}

/// Convenience alias for `Result<T, FilterError>`.
pub type Result<T> = std::result::Result<T, FilterError>;

impl FilterError {
    /// Create a `Workspace` variant from a path and an `io::Error`.
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Create an `Extraction` variant from an archive path and any displayable reason.
    pub fn extraction(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// `true` if the MTA should bounce the message instead of retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DeliveryRead { .. })
    }

    /// The process exit status reported to the MTA for this failure.
    pub fn exit_code(&self) -> u8 {
        if self.is_permanent() {
            EX_UNAVAILABLE
        } else {
            EX_TEMPFAIL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "gone")
    }

    #[test]
    fn test_delivery_read_is_permanent() {
        let err = FilterError::DeliveryRead {
            path: PathBuf::from("/spool/1/content"),
            source: io_err(),
        };
        assert!(err.is_permanent());
        assert_eq!(err.exit_code(), EX_UNAVAILABLE);
    }

    #[test]
    fn test_everything_else_is_transient() {
        let errors = vec![
            FilterError::Config("bad".into()),
            FilterError::workspace("/spool", io_err()),
            FilterError::Parse("empty".into()),
            FilterError::extraction("/spool/a.zip", "corrupt"),
            FilterError::StoreConnect {
                location: "tasks.db".into(),
                reason: "locked".into(),
            },
            FilterError::StoreWrite {
                fingerprint: "ab".into(),
                reason: "disk full".into(),
            },
            FilterError::TransportSpawn {
                path: PathBuf::from("/usr/sbin/sendmail"),
                source: io_err(),
            },
            FilterError::TransportStatus {
                path: PathBuf::from("/usr/sbin/sendmail"),
                status: "exit status: 1".into(),
            },
            FilterError::Timeout(Duration::from_secs(5)),
        ];
        for err in errors {
            assert_eq!(err.exit_code(), EX_TEMPFAIL, "{err}");
        }
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = FilterError::extraction("/spool/x/part-2-a.zip", "invalid Zip archive");
        let msg = err.to_string();
        assert!(msg.contains("part-2-a.zip"));
        assert!(msg.contains("invalid Zip archive"));
    }
}
