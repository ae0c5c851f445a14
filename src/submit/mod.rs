//! Fingerprinting, classification, and task submission.

pub mod classify;
pub mod submitter;
