use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod error;
pub mod handler;
pub mod interrupt;
pub mod output;

/// Invoice Grabber - resumable bulk download of order documents
#[derive(Parser, Debug)]
#[command(name = "igrab")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override config directory path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (TRACE level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new collection run and download everything it finds
    Collect {
        /// Directory of listing pages (page-001.json, page-002.json, ...)
        #[arg(long, value_name = "DIR")]
        pages: PathBuf,

        /// First order date to include (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Last order date to include (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Free-text label appended to the session folder
        #[arg(long)]
        label: Option<String>,
    },

    /// Continue a persisted run, or hand off a completed one
    Resume {
        /// Directory of listing pages; not needed when collection already completed
        #[arg(long, value_name = "DIR")]
        pages: Option<PathBuf>,
    },

    /// Show the persisted run, session counter and adaptive profile
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discard the persisted run
    Clear,

    /// Show finished sessions
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        /// Configuration action
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key (e.g., download.max_concurrent)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., download.max_concurrent)
        key: String,

        /// Configuration value
        value: String,
    },

    /// Show all configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the config directory in use
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collect() {
        let cli = Cli::try_parse_from([
            "igrab",
            "--verbose",
            "collect",
            "--pages",
            "pages",
            "--start",
            "2025-08-01",
            "--end",
            "2025-10-31",
            "--label",
            "Q1_Aug_Oct",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Collect { label, start, .. } => {
                assert_eq!(label.as_deref(), Some("Q1_Aug_Oct"));
                assert_eq!(start, "2025-08-01");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["igrab", "status", "--json", "--config", "/tmp/x"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_collect_requires_window() {
        assert!(Cli::try_parse_from(["igrab", "collect", "--pages", "p"]).is_err());
    }
}
