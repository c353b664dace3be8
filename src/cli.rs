//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and environment fallbacks.

use clap::Parser;
use std::path::PathBuf;

/// accessboard - accessibility dashboards and badges for CI pipelines
///
/// Receives accessibility scan reports from CI at POST /incoming, stores
/// per-commit and per-URL counts, and serves JSON summaries and SVG badges.
///
/// Examples:
///   accessboard
///   accessboard --bind 0.0.0.0:8080 --database /var/lib/accessboard/board.db
///   accessboard --notify --github-token ghp_xxx
///   accessboard --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .accessboard.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g. 0.0.0.0:3000)
    #[arg(short, long, value_name = "ADDR", env = "ACCESSBOARD_BIND")]
    pub bind: Option<String>,

    /// SQLite database file (or :memory:)
    #[arg(short, long, value_name = "PATH", env = "DATABASE_URL")]
    pub database: Option<String>,

    /// GitHub token used for commit status updates
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub API base URL
    #[arg(long, value_name = "URL")]
    pub github_api_url: Option<String>,

    /// Public base URL of this server, used in commit status links
    #[arg(long, value_name = "URL", env = "ACCESSBOARD_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Post a commit status to GitHub after each report
    #[arg(long)]
    pub notify: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .accessboard.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.github_api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("GitHub API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref database) = self.database {
            if database.trim().is_empty() {
                return Err("Database path must not be empty".to_string());
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
