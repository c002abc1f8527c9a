//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::AdjustMode;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// StockPulse - multi-source market data with failover and group analysis
///
/// Fetches A-share market data from several upstream providers, falling back
/// to the next provider when one is down, and scores whole indices and
/// industries from their members.
///
/// Examples:
///   stockpulse index 000300 --limit 20
///   stockpulse industry Banks --format json
///   stockpulse compare --limit 5
///   stockpulse history 600000 --start 2024-01-01
///   stockpulse health
///   stockpulse init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for stockpulse.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true, env = "STOCKPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE", global = true)]
    pub output: Option<PathBuf>,

    /// Attempts per provider before falling back
    #[arg(long, value_name = "COUNT", global = true)]
    pub max_retries: Option<u32>,

    /// Member analyses in flight at once
    #[arg(long, value_name = "NUM", global = true)]
    pub concurrency: Option<usize>,

    /// Seconds a group summary stays cached
    #[arg(long, value_name = "SECS", global = true)]
    pub cache_ttl: Option<u64>,

    /// Deadline for one member analysis in seconds (0 disables it)
    #[arg(long, value_name = "SECS", global = true)]
    pub member_timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Analyze an index by its constituents
    Index {
        /// Index code, e.g. 000300
        code: String,

        /// Members to analyze (0 = all, default from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Analyze an industry by its members
    Industry {
        /// Industry name
        name: String,

        /// Members to analyze (0 = all, default from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Rank all industries by today's change
    Compare {
        /// Industries shown at the top and bottom
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Daily bars for one entity
    History {
        /// Entity code, e.g. 600000
        code: String,

        /// First day (YYYY-MM-DD), defaults to --days before --end
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Calendar days covered when --start is omitted
        #[arg(long, default_value = "120")]
        days: u32,

        /// Price adjustment
        #[arg(long, default_value = "forward")]
        adjust: AdjustMode,
    },

    /// Basic information for an entity
    Info { code: String },

    /// Financial indicators for an entity
    Financials { code: String },

    /// Entities listed on an exchange board (sh, sz, cyb, ...)
    Board { board: String },

    /// Entities belonging to a concept theme
    Concept {
        name: String,

        /// List each member's name, latest price and change
        #[arg(long)]
        detail: bool,
    },

    /// Capital flow for an entity
    Flow { code: String },

    /// Northbound flow history
    NorthFlow,

    /// Probe every provider
    Health,

    /// Failover health counters
    ///
    /// Counters live in memory for one process, so a fresh invocation reports
    /// every provider healthy with zero failures. The same counters are
    /// logged at debug level after every other command.
    Status,

    /// Generate a default stockpulse.toml configuration file
    InitConfig,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_retries == Some(0) {
            return Err("Max retries must be at least 1".to_string());
        }

        match &self.command {
            Command::Index { code, .. } if code.trim().is_empty() => {
                Err("Index code must not be empty".to_string())
            }
            Command::Industry { name, .. } if name.trim().is_empty() => {
                Err("Industry name must not be empty".to_string())
            }
            Command::Compare { limit: 0 } => Err("Compare limit must be at least 1".to_string()),
            Command::History {
                start: Some(start),
                end: Some(end),
                ..
            } if start > end => Err(format!("Start date {} is after end date {}", start, end)),
            _ => Ok(()),
        }
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
