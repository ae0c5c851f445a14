//! Zip archive expansion into the workspace.
//!
//! Members are written flat into a `{archive}.d/` directory next to the
//! archive. Nested zips are only expanded while the depth bound allows it,
//! and the bytes and files written per top-level archive are capped, so a
//! small archive cannot fill the spool.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::error::{FilterError, Result};
use crate::workspace::Workspace;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Bounds applied to one expansion.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    /// Archive levels to expand; 1 means members are never re-expanded.
    pub max_depth: usize,
    /// Total member bytes written for one top-level archive.
    pub max_bytes: u64,
    /// Total member files written for one top-level archive, nested ones included.
    pub max_members: usize,
}

/// A file produced by expanding an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMember {
    pub path: PathBuf,
    /// The archive the member was read from (the inner one for nested zips).
    pub archive: PathBuf,
}

/// `true` if `data` starts with a zip local file header.
pub fn is_zip_bytes(data: &[u8]) -> bool {
    data.starts_with(ZIP_MAGIC)
}

/// What is left of the limits while one top-level archive is expanded.
struct Budget {
    bytes: u64,
    files: usize,
}

/// Expand `archive` into the workspace and return its member files.
///
/// Any corrupt, encrypted or oversized archive, or a member with an unsafe
/// path, is an [`FilterError::Extraction`].
pub fn expand(workspace: &Workspace, archive: &Path, limits: ArchiveLimits) -> Result<Vec<ExtractedMember>> {
    let mut budget = Budget {
        bytes: limits.max_bytes,
        files: limits.max_members,
    };
    let mut members = Vec::new();
    expand_level(workspace, archive, limits, 1, &mut budget, &mut members)?;
    debug!(
        archive = %archive.display(),
        members = members.len(),
        bytes = limits.max_bytes - budget.bytes,
        "Expanded archive"
    );
    Ok(members)
}

fn expand_level(
    workspace: &Workspace,
    archive: &Path,
    limits: ArchiveLimits,
    depth: usize,
    budget: &mut Budget,
    out: &mut Vec<ExtractedMember>,
) -> Result<()> {
    let file = File::open(archive).map_err(|e| FilterError::extraction(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| FilterError::extraction(archive, e))?;

    let parent = archive.parent().unwrap_or_else(|| workspace.path());
    let dir_name = format!(
        "{}.d",
        archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string())
    );
    let dir = workspace.create_subdir(parent, &dir_name)?;

    for index in 0..zip.len() {
        // Inspect the entry header first: reading an encrypted member fails
        // before its flags can be looked at.
        let (raw_name, encrypted, enclosed) = {
            let entry = zip
                .by_index_raw(index)
                .map_err(|e| FilterError::extraction(archive, format!("member {index}: {e}")))?;
            if entry.is_dir() {
                continue;
            }
            (entry.name().to_string(), entry.encrypted(), entry.enclosed_name())
        };
        if encrypted {
            return Err(FilterError::extraction(
                archive,
                format!("member '{raw_name}' is encrypted"),
            ));
        }
        let enclosed = enclosed.ok_or_else(|| {
            FilterError::extraction(archive, format!("unsafe member path '{raw_name}'"))
        })?;
        let name = enclosed
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("member-{index}"));

        if budget.files == 0 {
            return Err(FilterError::extraction(
                archive,
                format!("more than {} members", limits.max_members),
            ));
        }
        budget.files -= 1;

        let mut entry = zip
            .by_index(index)
            .map_err(|e| FilterError::extraction(archive, format!("member '{name}': {e}")))?;
        let mut data = Vec::new();
        entry
            .by_ref()
            .take(budget.bytes.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| FilterError::extraction(archive, format!("member '{name}': {e}")))?;
        if data.len() as u64 > budget.bytes {
            return Err(FilterError::extraction(
                archive,
                format!("expanded size exceeds {} bytes", limits.max_bytes),
            ));
        }
        budget.bytes -= data.len() as u64;

        let path = workspace.write_file(&dir, &name, &data)?;
        if depth < limits.max_depth && is_zip_bytes(&data) {
            expand_level(workspace, &path, limits, depth + 1, budget, out)?;
        } else {
            out.push(ExtractedMember {
                path,
                archive: archive.to_path_buf(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn setup(zip: &[u8]) -> (tempfile::TempDir, Workspace, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let path = ws.write_file(ws.path(), "part-1-bundle.zip", zip).unwrap();
        (root, ws, path)
    }

    const LIMITS: ArchiveLimits = ArchiveLimits {
        max_depth: 1,
        max_bytes: 1024 * 1024,
        max_members: 100,
    };

    #[test]
    fn test_two_members_two_distinct_paths() {
        let zip = build_zip(&[("a.exe", b"MZ one"), ("b.exe", b"MZ two")]);
        let (_root, ws, archive) = setup(&zip);
        let members = expand(&ws, &archive, LIMITS).unwrap();
        assert_eq!(members.len(), 2);
        assert_ne!(members[0].path, members[1].path);
        for m in &members {
            assert!(m.path.starts_with(ws.path()));
            assert_eq!(m.archive, archive);
        }
        assert_eq!(std::fs::read(&members[1].path).unwrap(), b"MZ two");
    }

    #[test]
    fn test_directory_entries_are_skipped_and_paths_flattened() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("docs/", SimpleFileOptions::default()).unwrap();
        writer.start_file("docs/readme.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"hello").unwrap();
        let zip = writer.finish().unwrap().into_inner();

        let (_root, ws, archive) = setup(&zip);
        let members = expand(&ws, &archive, LIMITS).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].path.file_name().unwrap(), "readme.txt");
    }

    #[test]
    fn test_nested_zip_not_expanded_at_depth_one() {
        let inner = build_zip(&[("deep.exe", b"MZ deep")]);
        let outer = build_zip(&[("inner.zip", &inner)]);
        let (_root, ws, archive) = setup(&outer);
        let members = expand(&ws, &archive, LIMITS).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].path.file_name().unwrap(), "inner.zip");
    }

    #[test]
    fn test_nested_zip_expanded_within_depth() {
        let inner = build_zip(&[("deep.exe", b"MZ deep")]);
        let outer = build_zip(&[("inner.zip", &inner), ("top.exe", b"MZ top")]);
        let (_root, ws, archive) = setup(&outer);
        let limits = ArchiveLimits {
            max_depth: 2,
            ..LIMITS
        };
        let members = expand(&ws, &archive, limits).unwrap();
        let names: Vec<_> = members
            .iter()
            .map(|m| m.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["deep.exe", "top.exe"]);
        assert_eq!(members[0].archive.file_name().unwrap(), "inner.zip");
    }

    #[test]
    fn test_size_budget_is_enforced() {
        let zip = build_zip(&[("big.bin", &[0u8; 4096])]);
        let (_root, ws, archive) = setup(&zip);
        let limits = ArchiveLimits {
            max_bytes: 1000,
            ..LIMITS
        };
        let err = expand(&ws, &archive, limits).unwrap_err();
        assert!(matches!(err, FilterError::Extraction { .. }));
    }

    #[test]
    fn test_member_escaping_the_directory_is_rejected() {
        let zip = build_zip(&[("ok.exe", b"MZ fine"), ("../../evil.exe", b"MZ evil")]);
        let (_root, ws, archive) = setup(&zip);
        let err = expand(&ws, &archive, LIMITS).unwrap_err();
        assert!(matches!(&err, FilterError::Extraction { reason, .. } if reason.contains("unsafe")));
        assert_eq!(err.exit_code(), crate::error::EX_TEMPFAIL);
        assert!(!ws.path().parent().unwrap().join("evil.exe").exists());
    }

    #[test]
    fn test_encrypted_member_is_rejected() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("secret.exe", stored).unwrap();
        writer.write_all(b"MZ secret").unwrap();
        let mut zip = writer.finish().unwrap().into_inner();

        // Set the "encrypted" general purpose flag in the local and central headers.
        zip[6] |= 1;
        let central = zip.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        zip[central + 8] |= 1;

        let (_root, ws, archive) = setup(&zip);
        let err = expand(&ws, &archive, LIMITS).unwrap_err();
        assert!(matches!(&err, FilterError::Extraction { reason, .. } if reason.contains("encrypted")));
        assert_eq!(err.exit_code(), crate::error::EX_TEMPFAIL);
    }

    #[test]
    fn test_member_count_is_bounded() {
        let names: Vec<String> = (0..5).map(|i| format!("empty-{i}.txt")).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b""[..])).collect();
        let zip = build_zip(&files);
        let (_root, ws, archive) = setup(&zip);

        let limits = ArchiveLimits {
            max_members: 4,
            ..LIMITS
        };
        let err = expand(&ws, &archive, limits).unwrap_err();
        assert!(matches!(&err, FilterError::Extraction { reason, .. } if reason.contains("members")));

        let limits = ArchiveLimits {
            max_members: 5,
            ..LIMITS
        };
        assert_eq!(expand(&ws, &archive, limits).unwrap().len(), 5);
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let (_root, ws, archive) = setup(b"PK\x03\x04 definitely not a zip");
        let err = expand(&ws, &archive, LIMITS).unwrap_err();
        assert!(matches!(err, FilterError::Extraction { .. }));
        assert_eq!(err.exit_code(), crate::error::EX_TEMPFAIL);
    }
}
