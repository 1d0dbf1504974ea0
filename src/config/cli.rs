//! Core CLI surface
//!
//! The outer CLI shell owns argument parsing and exits non-zero on
//! invalid values; plugins only ever see a parsed `ProxyArgs`, delivered
//! once through the options-loaded lifecycle event.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryGroupBy {
    Url,
    MessageType,
}

/// Parsed core options. Plugins pick out the ones they own.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "simproxy", about = "API-simulation proxy engine")]
pub struct ProxyArgs {
    /// Path to the configuration file
    #[arg(long, short = 'c')]
    pub config_file: Option<PathBuf>,

    /// Disable loading mock responses
    #[arg(long)]
    pub no_mocks: bool,

    /// Path to the mocks file, overriding the configured one
    #[arg(long)]
    pub mocks_file: Option<PathBuf>,

    /// Disable stdio mocks (consumed by the stdio layer)
    #[arg(long)]
    pub no_stdio_mocks: bool,

    /// Path to the stdio mocks file (consumed by the stdio layer)
    #[arg(long)]
    pub stdio_mocks_file: Option<PathBuf>,

    /// Percentage of requests that should fail, 0-100
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub failure_rate: Option<u8>,

    /// Restrict simulated errors to these status codes
    #[arg(long, num_args = 1..)]
    pub allowed_errors: Option<Vec<u16>>,

    /// How the recording summary groups entries
    #[arg(long, value_enum)]
    pub summary_group_by: Option<SummaryGroupBy>,

    /// Log level override (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}
