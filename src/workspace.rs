//! Per-message workspace: the saved message, the saved transport arguments,
//! and every file extracted from the message.
//!
//! Layout of one workspace:
//!
//! ```text
//! {root}/{YYYYmmddTHHMMSS}-{pid}/
//!     content                 raw message bytes, never modified
//!     args                    transport arguments (JSON array)
//!     part-{n}-{name}         decoded leaf bodies
//!     part-{n}-{name}.d/      expanded archive members
//!     url-{n}.url             internet shortcuts for scanned URLs
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{FilterError, Result};

/// File holding the raw message.
pub const CONTENT_FILE: &str = "content";

/// File holding the saved transport arguments.
pub const ARGS_FILE: &str = "args";

/// Longest file name written by [`Workspace::write_file`], in bytes. Leaves
/// headroom below the 255-byte `NAME_MAX` for the `_N` suffix of duplicates.
const MAX_NAME_BYTES: usize = 200;

/// Trailing `.xxx` kept through truncation when it is at most this long.
const MAX_EXTENSION_BYTES: usize = 16;

/// A per-invocation scratch directory.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create the workspace for the current process under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        Self::create_for(root, std::process::id())
    }

    /// Create the workspace for process `pid` under `root`.
    pub fn create_for(root: &Path, pid: u32) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| FilterError::workspace(root, e))?;
        let name = format!("{}-{pid}", Utc::now().format("%Y%m%dT%H%M%S"));
        let dir = unique_path(&root.join(name));
        std::fs::create_dir(&dir).map_err(|e| FilterError::workspace(&dir, e))?;
        debug!(path = %dir.display(), "Created workspace");
        Ok(Self { dir })
    }

    /// The workspace directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn content_path(&self) -> PathBuf {
        self.dir.join(CONTENT_FILE)
    }

    pub fn args_path(&self) -> PathBuf {
        self.dir.join(ARGS_FILE)
    }

    /// Persist the raw message.
    pub fn save_content(&self, raw: &[u8]) -> Result<()> {
        let path = self.content_path();
        std::fs::write(&path, raw).map_err(|e| FilterError::workspace(&path, e))
    }

    /// Persist the transport arguments verbatim.
    pub fn save_args(&self, args: &[String]) -> Result<()> {
        let path = self.args_path();
        let json = serde_json::to_vec(args)
            .map_err(|e| FilterError::workspace(&path, std::io::Error::other(e)))?;
        std::fs::write(&path, json).map_err(|e| FilterError::workspace(&path, e))
    }

    /// Read the raw message back for delivery.
    pub fn load_content(&self) -> Result<Vec<u8>> {
        let path = self.content_path();
        std::fs::read(&path).map_err(|source| FilterError::DeliveryRead { path, source })
    }

    /// Read the transport arguments back for delivery.
    pub fn load_args(&self) -> Result<Vec<String>> {
        let path = self.args_path();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(source) => return Err(FilterError::DeliveryRead { path, source }),
        };
        serde_json::from_slice(&data).map_err(|e| FilterError::DeliveryRead {
            path,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }

    /// Write `data` into a new file named after `name` and return its path.
    ///
    /// The name is sanitized and made unique inside `dir` (which must be this
    /// workspace or a directory below it).
    pub fn write_file(&self, dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = unique_path(&dir.join(sanitize_filename_part(name, MAX_NAME_BYTES)));
        std::fs::write(&path, data).map_err(|e| FilterError::workspace(&path, e))?;
        Ok(path)
    }

    /// Create a fresh subdirectory named after `name`.
    pub fn create_subdir(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        let path = unique_path(&parent.join(sanitize_filename_part(name, MAX_NAME_BYTES)));
        std::fs::create_dir_all(&path).map_err(|e| FilterError::workspace(&path, e))?;
        Ok(path)
    }

    /// Delete the workspace and everything in it.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir).map_err(|e| FilterError::workspace(&self.dir, e))?;
        debug!(path = %self.dir.display(), "Removed workspace");
        Ok(())
    }
}

/// Remove workspaces under `root` last modified more than `max_age` ago.
///
/// Only directories that look like workspaces (they hold a `content` file)
/// are touched. Failures are logged and skipped. Returns how many were removed.
pub fn sweep(root: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %root.display(), error = %e, "Workspace root not readable, skipping sweep");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !path.join(CONTENT_FILE).exists() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if !matches!(age, Some(age) if age > max_age) {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove expired workspace");
            }
        }
    }
    if removed > 0 {
        info!(root = %root.display(), removed, "Swept expired workspaces");
    }
    removed
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_bytes` bytes of
/// UTF-8 on a character boundary, keeping a short extension intact.
pub fn sanitize_filename_part(s: &str, max_bytes: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Never produce "." or ".." or a hidden file.
    let sanitized = truncate_keeping_extension(sanitized.trim_start_matches('.'), max_bytes);
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

fn truncate_keeping_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let ext = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => &name[dot..],
        _ => "",
    };
    if ext.len() >= max_bytes {
        return truncate_at_char(name, max_bytes).to_string();
    }
    let stem = &name[..name.len() - ext.len()];
    format!("{}{}", truncate_at_char(stem, max_bytes - ext.len()), ext)
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
fn truncate_at_char(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut i = 1u32;
    loop {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}
