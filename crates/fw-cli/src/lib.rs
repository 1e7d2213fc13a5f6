//! Folding client monitor CLI library.
//!
//! This crate provides the CLI interface for the folding client monitor.

mod cli;
pub mod commands;
mod config;
pub mod monitor;

pub use cli::{Cli, Commands, PpdArgs};
pub use config::{ClientConfig, Config, ProteinConfig};
