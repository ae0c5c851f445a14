//! Artifact extraction: tree walking, archive expansion, and URL scanning.

pub mod archive;
pub mod urls;
pub mod walker;
