//! CLI command implementations.

pub mod ingest;
pub mod publish;
pub mod status;
