//! CLI subcommand implementations.

pub mod history;
pub mod ppd;
pub mod status;
pub mod sync;
