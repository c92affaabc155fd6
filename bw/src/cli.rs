//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// BatchWorker - supervised batch processing loop
#[derive(Parser)]
#[command(
    name = "bw",
    about = "Supervised batch worker with bounded concurrency, backoff and graceful drain",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Write logs to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the worker against a synthetic work source
    Run {
        /// Items produced per fetch by the synthetic source
        #[arg(long, default_value = "20")]
        items_per_batch: usize,

        /// Probability that an item fails (0.0 - 1.0)
        #[arg(long, default_value = "0.05")]
        item_fail_rate: f64,

        /// Probability that a fetch fails (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        fetch_fail_rate: f64,

        /// Upper bound on simulated item latency in milliseconds
        #[arg(long, default_value = "250")]
        max_latency_ms: u64,

        /// Seconds between status lines
        #[arg(long, default_value = "5")]
        status_interval_secs: u64,

        /// Stop on its own after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(short, long, default_value = "yaml")]
        format: OutputFormat,
    },
}

/// Output format for the config command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: yaml or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchworker")
        .join("logs")
        .join("batchworker.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Help footer naming the log file location
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["bw", "run"]);
        match cli.command {
            Command::Run {
                items_per_batch,
                item_fail_rate,
                fetch_fail_rate,
                duration_secs,
                ..
            } => {
                assert_eq!(items_per_batch, 20);
                assert_eq!(item_fail_rate, 0.05);
                assert_eq!(fetch_fail_rate, 0.0);
                assert_eq!(duration_secs, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_options() {
        let cli = Cli::parse_from([
            "bw",
            "run",
            "--items-per-batch",
            "5",
            "--fetch-fail-rate",
            "0.5",
            "--duration-secs",
            "3",
        ]);
        assert!(matches!(
            cli.command,
            Command::Run {
                items_per_batch: 5,
                duration_secs: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["bw", "config", "--config", "/tmp/bw.yml", "-v", "--log-stderr"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bw.yml")));
        assert!(cli.verbose);
        assert!(cli.log_stderr);
    }

    #[test]
    fn test_cli_parse_config_format() {
        let cli = Cli::parse_from(["bw", "config", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["bw"]).is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("YAML".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert_eq!("yml".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path_location() {
        let path = get_log_path();
        assert!(path.ends_with("batchworker/logs/batchworker.log"));
    }

    #[test]
    fn test_after_help_names_log_path() {
        let help = generate_after_help();
        assert!(help.starts_with("Logs are written to: "));
        assert!(help.ends_with(&get_log_path().display().to_string()));
    }
}
