//! `sandfilter`: an MTA content filter feeding a sandbox analysis queue.
//!
//! Each invocation handles one message: it is saved into a per-process
//! workspace, parsed into a tree, flattened into candidate attachments (and
//! optionally URLs), submitted to the task store at most once per content
//! fingerprint, and finally handed back to the mail transport.

pub mod config;
pub mod deadline;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod submit;
pub mod workspace;
