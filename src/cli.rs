//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Methodology;
use clap::Parser;
use std::path::PathBuf;

/// PR Watcher - pull request statistics for AI coding agents
///
/// Counts the pull requests each tracked agent has opened on GitHub,
/// computes merge rates, appends the result to a history file and
/// renders a snapshot report.
///
/// Examples:
///   pr-watcher
///   pr-watcher --methodology legacy --output stats.md
///   pr-watcher --dry-run
///   pr-watcher --report-only --format json
///   pr-watcher --trend chart-data.csv --trend-window 90
///   pr-watcher --import-csv data.csv
///   pr-watcher --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .pr-watcher.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// History file (JSONL, one snapshot per line)
    #[arg(long, value_name = "FILE")]
    pub history: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Rate definition for this run (ready, legacy)
    #[arg(long, value_name = "METHOD")]
    pub methodology: Option<MethodologyArg>,

    /// GitHub API base URL
    #[arg(long, value_name = "URL", env = "PR_WATCHER_API_URL")]
    pub api_url: Option<String>,

    /// GitHub token; raises the search rate limit
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Maximum count queries in flight
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Attempts per count query before it is marked failed
    #[arg(long, value_name = "NUM")]
    pub max_attempts: Option<u32>,

    /// Deadline for the whole collection run, in seconds
    ///
    /// Nothing is appended to the history when the deadline passes.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the query plan without calling GitHub
    #[arg(long, conflicts_with_all = ["report_only", "import_csv"])]
    pub dry_run: bool,

    /// Render the latest snapshot from history without collecting
    #[arg(long, conflicts_with = "import_csv")]
    pub report_only: bool,

    /// Export the trend series (CSV) for chart generation
    #[arg(long, value_name = "FILE")]
    pub trend: Option<PathBuf>,

    /// Only export the last N snapshots
    #[arg(long, value_name = "N", requires = "trend")]
    pub trend_window: Option<usize>,

    /// Import a legacy data.csv into the history and exit
    #[arg(long, value_name = "FILE")]
    pub import_csv: Option<PathBuf>,

    /// Exit with code 2 when some agents are incomplete
    #[arg(long)]
    pub strict: bool,

    /// Generate a default .pr-watcher.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
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

/// Methodology selector for --methodology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MethodologyArg {
    /// merged / ready (non-draft)
    Ready,
    /// merged / total
    Legacy,
}

impl From<MethodologyArg> for Methodology {
    fn from(arg: MethodologyArg) -> Self {
        match arg {
            MethodologyArg::Ready => Methodology::ReadyBased,
            MethodologyArg::Legacy => Methodology::LegacyTotalBased,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref api_url) = self.api_url {
            if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_attempts == Some(0) {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.trend_window == Some(0) {
            return Err("Trend window must be at least 1 snapshot".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref path) = self.import_csv {
            if !path.is_file() {
                return Err(format!("Import file does not exist: {}", path.display()));
            }
        }

        Ok(())
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
