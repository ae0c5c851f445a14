//! Filter configuration.
//!
//! Configuration is loaded once from a TOML file at:
//! 1. the `--config` command-line flag
//! 2. `$SANDFILTER_CONFIG` (environment variable)
//! 3. `/etc/sandfilter/config.toml`
//!
//! A missing file at the default location yields the built-in defaults. Any
//! other problem is a [`FilterError::Config`], which the MTA sees as a
//! temporary failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sandfilter/config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// What gets extracted from each message.
    pub filter: FilterConfig,
    /// Per-message scratch directories.
    pub workspace: WorkspaceConfig,
    /// Sandbox task queue.
    pub sandbox: SandboxConfig,
    /// Outbound mail transport.
    pub transport: TransportConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Optional log file, written in addition to stderr.
    pub log_file: Option<PathBuf>,
}

/// Extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Expand `application/zip` attachments into their members.
    pub process_archives: bool,
    /// Scan the message text for http(s) URLs.
    pub process_urls: bool,
    /// Leaf content types that are never submitted (exact match, case-insensitive).
    pub ignore_mime_types: Vec<String>,
    /// Regular expressions; a URL matching any of them is not submitted.
    pub ignore_url_patterns: Vec<String>,
    /// How many archive levels are expanded (1 = only archives attached to the message).
    pub max_archive_depth: usize,
    /// Upper bound on the bytes written while expanding one archive.
    pub max_extracted_bytes: u64,
    /// Upper bound on the files written while expanding one archive.
    pub max_archive_members: usize,
    /// Overall processing deadline in seconds (0 disables it).
    pub processing_timeout_secs: u64,
}

/// Workspace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory under which one workspace per message is created.
    pub root: PathBuf,
    /// Workspaces older than this are removed at startup (0 disables the sweep).
    pub retention_hours: u64,
}

/// Sandbox task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Path of the SQLite task database.
    pub database: PathBuf,
    /// Analysis machine pool stored with each task.
    pub machine_pool: String,
}

/// Outbound transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport executable, normally Postfix `sendmail`.
    pub path: PathBuf,
    /// Arguments placed before the saved invocation arguments.
    pub args: Vec<String>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_archives: true,
            process_urls: false,
            ignore_mime_types: vec![
                "text/plain".to_string(),
                "text/html".to_string(),
                "message/delivery-status".to_string(),
                "application/pgp-signature".to_string(),
                "application/pkcs7-signature".to_string(),
            ],
            ignore_url_patterns: Vec::new(),
            max_archive_depth: 1,
            max_extracted_bytes: 256 * 1024 * 1024, // 256 MB
            max_archive_members: 1000,
            processing_timeout_secs: 120,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/spool/sandfilter"),
            retention_hours: 72,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("/var/lib/sandfilter/tasks.db"),
            machine_pool: String::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/usr/sbin/sendmail"),
            args: vec!["-G".to_string(), "-i".to_string()],
        }
    }
}

impl FilterConfig {
    /// `true` if leaves of this content type are dropped from the candidate list.
    pub fn is_ignored(&self, content_type: &str) -> bool {
        self.ignore_mime_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(content_type))
    }

    /// The processing deadline, or `None` when disabled.
    pub fn processing_timeout(&self) -> Option<Duration> {
        (self.processing_timeout_secs > 0).then(|| Duration::from_secs(self.processing_timeout_secs))
    }

    /// Compile `ignore_url_patterns` into case-insensitive regexes.
    pub fn url_exclusions(&self) -> Result<Vec<Regex>> {
        self.ignore_url_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| FilterError::Config(format!("invalid ignore_url_patterns entry '{p}': {e}")))
            })
            .collect()
    }
}

impl WorkspaceConfig {
    /// The sweep age, or `None` when disabled.
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_hours > 0).then(|| Duration::from_secs(self.retention_hours * 3600))
    }
}

impl Config {
    /// Reject settings that would only fail later, mid-message.
    pub fn validate(&self) -> Result<()> {
        self.filter.url_exclusions()?;
        if self.workspace.root.as_os_str().is_empty() {
            return Err(FilterError::Config("workspace.root is empty".into()));
        }
        if self.transport.path.as_os_str().is_empty() {
            return Err(FilterError::Config("transport.path is empty".into()));
        }
        Ok(())
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit`, or from the standard locations.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => config_file_path(),
    };

    if !required && !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| FilterError::Config(format!("cannot read '{}': {e}", path.display())))?;
    let cfg = parse_config(&contents)
        .map_err(|e| FilterError::Config(format!("'{}': {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(contents: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(contents).map_err(|e| FilterError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Determine the config file path and whether it must exist.
///
/// A path named by the environment variable is required; the default is not.
pub fn config_file_path() -> (PathBuf, bool) {
    match std::env::var("SANDFILTER_CONFIG") {
        Ok(env_path) if !env_path.is_empty() => (PathBuf::from(env_path), true),
        _ => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}
