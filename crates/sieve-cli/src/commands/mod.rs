//! Subcommand implementations.

pub mod describe;
pub mod query;
