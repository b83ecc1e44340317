//! CLI argument definitions for scanpost-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use scanpost_core::config::ScanpostConfig;

/// Scanpost network scan server daemon.
///
/// Exposes configured scan devices as eSCL/AirScan network scanners:
/// loads configuration, registers devices, starts the protocol server,
/// and manages graceful shutdown.
#[derive(Parser, Debug)]
#[command(name = "scanpost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to scanpost.toml configuration file.
    #[arg(short, long, default_value = "/etc/scanpost/scanpost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply CLI overrides on top of a loaded configuration.
    ///
    /// CLI arguments have the highest precedence in the loading chain
    /// (CLI > environment > file > defaults).
    pub fn apply_overrides(&self, config: &mut ScanpostConfig) {
        if let Some(log_level) = &self.log_level {
            config.general.log_level = log_level.clone();
        }
        if let Some(log_format) = &self.log_format {
            config.general.log_format = log_format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}
