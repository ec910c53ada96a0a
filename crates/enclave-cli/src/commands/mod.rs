//! Subcommand implementations

pub mod resolve;
pub mod scan;
