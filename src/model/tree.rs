//! Structural representation of a parsed message.
//!
//! The tree is built once by [`crate::parser::mime::ingest`] and is read-only
//! afterwards. Leaf bodies live on disk in the workspace; the tree only holds
//! their paths.

use std::path::PathBuf;

/// Content types that are descended into rather than treated as artifacts.
pub const CONTAINER_TYPES: &[&str] = &[
    "multipart/alternative",
    "multipart/related",
    "multipart/mixed",
    "multipart/signed",
    "multipart/report",
    "message/rfc822",
];

/// `true` if `content_type` is one of the recognized container types.
pub fn is_container_type(content_type: &str) -> bool {
    CONTAINER_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(content_type))
}

/// One node of a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageNode {
    /// A multipart boundary or an embedded message.
    Container {
        content_type: String,
        children: Vec<MessageNode>,
    },
    /// A body part, decoded and saved into the workspace.
    Leaf {
        content_type: String,
        /// Filename declared by the sender, if any.
        filename: Option<String>,
        body: PathBuf,
    },
}

impl MessageNode {
    /// Dispatch to `visitor`, pre-order: a container is entered before its
    /// children and left after them.
    pub fn accept<V: NodeVisitor>(&self, visitor: &mut V) -> Result<(), V::Error> {
        match self {
            Self::Container {
                content_type,
                children,
            } => {
                visitor.enter_container(content_type)?;
                for child in children {
                    child.accept(visitor)?;
                }
                visitor.leave_container(content_type)
            }
            Self::Leaf {
                content_type,
                filename,
                body,
            } => visitor.visit_leaf(content_type, filename.as_deref(), body),
        }
    }

    /// Number of leaves below (and including) this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Container { children, .. } => children.iter().map(Self::leaf_count).sum(),
            Self::Leaf { .. } => 1,
        }
    }
}

/// Depth-first visitor over a [`MessageNode`] tree.
pub trait NodeVisitor {
    type Error;

    fn enter_container(&mut self, _content_type: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn leave_container(&mut self, _content_type: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_leaf(
        &mut self,
        content_type: &str,
        filename: Option<&str>,
        body: &std::path::Path,
    ) -> Result<(), Self::Error>;
}
