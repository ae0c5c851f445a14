//! Outbound mail transport.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{FilterError, Result};

/// Hands a message back to the MTA.
pub trait Transport {
    /// Deliver `content` using the saved invocation `args`.
    fn deliver(&self, args: &[String], content: &[u8]) -> Result<()>;
}

/// Re-injects mail by piping it into a `sendmail`-compatible program.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    path: PathBuf,
    base_args: Vec<String>,
}

impl SendmailTransport {
    pub fn new(path: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            base_args,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(&config.path, config.args.clone())
    }
}

impl Transport for SendmailTransport {
    fn deliver(&self, args: &[String], content: &[u8]) -> Result<()> {
        let spawn_err = |source: std::io::Error| FilterError::TransportSpawn {
            path: self.path.clone(),
            source,
        };

        debug!(path = %self.path.display(), ?args, "Running transport");
        let mut child = Command::new(&self.path)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| spawn_err(std::io::Error::other("transport stdin unavailable")))?;
            stdin.write_all(content).map_err(spawn_err)?;
        }

        let status = child.wait().map_err(spawn_err)?;
        if !status.success() {
            return Err(FilterError::TransportStatus {
                path: self.path.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_content_and_args_reach_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("delivered");
        // sh -c 'cat > "$0"; printf "%s\n" "$@" > "$0.args"' OUT ARGS...
        let transport = SendmailTransport::new(
            "/bin/sh",
            vec![
                "-c".to_string(),
                "cat > \"$0\"; printf '%s\\n' \"$@\" > \"$0.args\"".to_string(),
                out.display().to_string(),
            ],
        );
        transport
            .deliver(&["-f".into(), "a@example.com".into(), "b@example.net".into()], b"Subject: x\n\nbody\n")
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"Subject: x\n\nbody\n");
        let args = std::fs::read_to_string(dir.path().join("delivered.args")).unwrap();
        assert_eq!(args, "-f\na@example.com\nb@example.net\n");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let transport = SendmailTransport::new("/nonexistent/sendmail", Vec::new());
        let err = transport.deliver(&[], b"x").unwrap_err();
        assert!(matches!(err, FilterError::TransportSpawn { .. }));
    }

    #[test]
    fn test_nonzero_exit_is_reported() {
        let transport = SendmailTransport::new("/bin/sh", vec!["-c".into(), "cat >/dev/null; exit 75".into()]);
        let err = transport.deliver(&[], b"x").unwrap_err();
        assert!(matches!(err, FilterError::TransportStatus { .. }));
        assert!(!err.is_permanent());
    }
}
