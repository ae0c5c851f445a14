//! Flatten a message tree into the ordered list of candidate attachments.

use std::path::Path;

use tracing::debug;

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::extract::archive::{self, ArchiveLimits};
use crate::model::attachment::Attachment;
use crate::model::tree::{MessageNode, NodeVisitor};
use crate::workspace::Workspace;

const ZIP_TYPE: &str = "application/zip";

/// Collects attachments in depth-first pre-order.
///
/// Containers are always entered. The ignore list applies to leaves only, and
/// an ignored leaf stays on disk untouched.
pub struct MimeWalker<'a> {
    config: &'a FilterConfig,
    workspace: &'a Workspace,
    attachments: Vec<Attachment>,
}

impl<'a> MimeWalker<'a> {
    pub fn new(config: &'a FilterConfig, workspace: &'a Workspace) -> Self {
        Self {
            config,
            workspace,
            attachments: Vec::new(),
        }
    }

    /// Walk `root` and return the candidates in discovery order.
    pub fn walk(mut self, root: &MessageNode) -> Result<Vec<Attachment>> {
        root.accept(&mut self)?;
        Ok(self.attachments)
    }

    fn limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_depth: self.config.max_archive_depth.max(1),
            max_bytes: self.config.max_extracted_bytes,
            max_members: self.config.max_archive_members,
        }
    }
}

impl NodeVisitor for MimeWalker<'_> {
    type Error = FilterError;

    fn visit_leaf(&mut self, content_type: &str, _filename: Option<&str>, body: &Path) -> Result<()> {
        if self.config.is_ignored(content_type) {
            debug!(content_type, path = %body.display(), "Ignoring leaf");
            return Ok(());
        }

        if self.config.process_archives && content_type == ZIP_TYPE {
            let members = archive::expand(self.workspace, body, self.limits())?;
            self.attachments
                .extend(members.into_iter().map(|m| Attachment {
                    path: m.path,
                    content_type: content_type.to_string(),
                    archive: Some(m.archive),
                }));
            return Ok(());
        }

        self.attachments.push(Attachment {
            path: body.to_path_buf(),
            content_type: content_type.to_string(),
            archive: None,
        });
        Ok(())
    }
}

/// Convenience wrapper around [`MimeWalker`].
pub fn collect_attachments(
    config: &FilterConfig,
    workspace: &Workspace,
    root: &MessageNode,
) -> Result<Vec<Attachment>> {
    MimeWalker::new(config, workspace).walk(root)
}
