//! Content sniffing into analysis packages.
//!
//! Only the bytes are looked at. The declared content type and the filename
//! come from the sender and are not trusted.

use std::io::Cursor;

use crate::model::submission::Package;

/// How much of a file is inspected for text signatures.
const SNIFF_LEN: usize = 4096;

const PDF_MAGIC: &[u8] = b"%PDF-";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const RTF_MAGIC: &[u8] = b"{\\rtf";
const SHORTCUT_MAGIC: &[u8] = b"[InternetShortcut]";

/// Pick the analysis package for `data`.
pub fn classify(data: &[u8]) -> Package {
    if data.starts_with(PDF_MAGIC) {
        return Package::Pdf;
    }
    if data.starts_with(OLE_MAGIC) {
        return classify_ole(data);
    }
    if data.starts_with(ZIP_MAGIC) {
        return classify_ooxml(data);
    }
    if data.starts_with(RTF_MAGIC) {
        return Package::Document;
    }
    if data.starts_with(SHORTCUT_MAGIC) {
        return Package::Html;
    }

    let head = String::from_utf8_lossy(&data[..data.len().min(SNIFF_LEN)]);
    let trimmed = head.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("#!") {
        return Package::Script;
    }
    if is_diff(trimmed) {
        return Package::Skip;
    }
    if is_html(trimmed) {
        return Package::Html;
    }
    Package::Executable
}

/// Legacy Office documents: identify by the stream names in the root storage.
///
/// Only the directory is consulted; document text never influences the result.
fn classify_ole(data: &[u8]) -> Package {
    let Ok(compound) = cfb::CompoundFile::open(Cursor::new(data)) else {
        return Package::Document;
    };
    let streams: Vec<String> = compound
        .read_root_storage()
        .filter(|entry| entry.is_stream())
        .map(|entry| entry.name().to_string())
        .collect();
    let has = |name: &str| streams.iter().any(|s| s == name);

    if has("PowerPoint Document") {
        Package::Presentation
    } else if has("Workbook") || has("Book") {
        Package::Spreadsheet
    } else {
        Package::Document
    }
}

/// Office Open XML documents are zips with a well-known top-level folder.
fn classify_ooxml(data: &[u8]) -> Package {
    let Ok(archive) = zip::ZipArchive::new(Cursor::new(data)) else {
        return Package::Executable;
    };
    let mut package = Package::Executable;
    for name in archive.file_names() {
        if name.starts_with("ppt/") {
            return Package::Presentation;
        }
        if name.starts_with("xl/") {
            return Package::Spreadsheet;
        }
        if name.starts_with("word/") {
            package = Package::Document;
        }
    }
    package
}

fn is_diff(text: &str) -> bool {
    if text.starts_with("diff ") || text.starts_with("Index: ") {
        return true;
    }
    let lines: Vec<&str> = text.lines().collect();
    lines.windows(2).any(|pair| {
        pair[0].starts_with("diff --git ")
            || (pair[0].starts_with("--- ") && pair[1].starts_with("+++ "))
    })
}

fn is_html(text: &str) -> bool {
    let lower = text.get(..512).unwrap_or(text).to_ascii_lowercase();
    ["<!doctype html", "<html", "<head", "<body", "<script", "<iframe"]
        .iter()
        .any(|tag| lower.starts_with(tag))
        || lower.contains("<html")
}
