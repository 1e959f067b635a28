//! zvault command-line interface: argument parsing and configuration.

pub mod cli;
pub mod config;

pub use cli::Cli;
pub use config::BackupConfig;
