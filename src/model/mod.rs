//! Core data model: the parsed message tree, extraction candidates, and
//! sandbox submission records.

pub mod attachment;
pub mod submission;
pub mod tree;
