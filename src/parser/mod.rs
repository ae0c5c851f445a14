//! Message ingestion and MIME structure parsing.

pub mod mime;
