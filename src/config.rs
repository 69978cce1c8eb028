//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::{Error, Result};
use crate::jobs::ArchiveJobSettings;

/// Service broker operators: backup, restore and bind lifecycles
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub operator: OperatorArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run every operator and status poller (default)
    Run,
    /// Archive metered events once and exit
    ArchiveMeteredEvents,
}

#[derive(Args, Debug, Clone)]
pub struct OperatorArgs {
    /// Namespace holding the broker resources
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Metrics and health server port
    #[arg(long, env = "METRICS_PORT", default_value = "8080")]
    pub metrics_port: u16,

    /// YAML plan catalog (`plans: [...]`)
    #[arg(long, env = "CATALOG_FILE")]
    pub catalog_file: Option<PathBuf>,

    /// Director base URL used for task lookups
    #[arg(long, env = "DIRECTOR_URL", default_value = "http://localhost:25555")]
    pub director_url: String,

    /// Default base URL of the service executors
    #[arg(long, env = "SERVICE_ENDPOINT", default_value = "http://localhost:9293")]
    pub service_endpoint: String,

    /// Timeout for director and executor HTTP calls, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    pub http_timeout_secs: u64,

    /// Bosh restore poll interval, in seconds
    #[arg(long, env = "RESTORE_POLL_INTERVAL_SECS", default_value = "10")]
    pub restore_poll_interval_secs: u64,

    /// Staggered deployment poll interval, in seconds
    #[arg(long, env = "DEPLOYMENT_POLL_INTERVAL_SECS", default_value = "5")]
    pub deployment_poll_interval_secs: u64,

    #[command(flatten)]
    pub archive: ArchiveArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Maximum number of events archived per run
    #[arg(long, env = "ARCHIVE_EVENTS_TO_PATCH", default_value = "500")]
    pub events_to_patch: usize,

    /// Pause between two archived events, in milliseconds
    #[arg(long, env = "ARCHIVE_SLEEP_DURATION_MS", default_value = "1000")]
    pub sleep_duration_ms: u64,

    /// Delete attempts per event
    #[arg(long, env = "ARCHIVE_DELETE_ATTEMPTS", default_value = "4")]
    pub delete_attempts: u32,

    /// Delay before the first delete retry, in milliseconds
    #[arg(long, env = "ARCHIVE_DELETE_MIN_DELAY_MS", default_value = "1000")]
    pub delete_min_delay_ms: u64,

    /// Directory receiving the archive files
    #[arg(long, env = "ARCHIVE_DIR", default_value = "./metering-archive")]
    pub archive_dir: PathBuf,
}

/// Resolved configuration handed to the engines
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub namespace: String,
    pub metrics_port: u16,
    pub catalog_file: Option<PathBuf>,
    pub director_url: String,
    pub service_endpoint: String,
    pub http_timeout: Duration,
    pub restore_poll_interval: Duration,
    pub deployment_poll_interval: Duration,
    pub archive: ArchiveJobSettings,
    pub archive_dir: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            metrics_port: 8080,
            catalog_file: None,
            director_url: "http://localhost:25555".to_string(),
            service_endpoint: "http://localhost:9293".to_string(),
            http_timeout: Duration::from_secs(30),
            restore_poll_interval: Duration::from_secs(10),
            deployment_poll_interval: Duration::from_secs(5),
            archive: ArchiveJobSettings::default(),
            archive_dir: PathBuf::from("./metering-archive"),
        }
    }
}

impl TryFrom<OperatorArgs> for OperatorConfig {
    type Error = Error;

    fn try_from(args: OperatorArgs) -> Result<Self> {
        if args.restore_poll_interval_secs == 0 || args.deployment_poll_interval_secs == 0 {
            return Err(Error::config("Poll intervals must be at least one second"));
        }
        if args.archive.delete_attempts == 0 {
            return Err(Error::config("Archive delete attempts must be at least 1"));
        }

        Ok(Self {
            namespace: args.namespace,
            metrics_port: args.metrics_port,
            catalog_file: args.catalog_file,
            director_url: args.director_url,
            service_endpoint: args.service_endpoint,
            http_timeout: Duration::from_secs(args.http_timeout_secs),
            restore_poll_interval: Duration::from_secs(args.restore_poll_interval_secs),
            deployment_poll_interval: Duration::from_secs(args.deployment_poll_interval_secs),
            archive: ArchiveJobSettings {
                events_to_patch: args.archive.events_to_patch,
                sleep_duration: Duration::from_millis(args.archive.sleep_duration_ms),
                delete_attempts: args.archive.delete_attempts,
                delete_min_delay: Duration::from_millis(args.archive.delete_min_delay_ms),
            },
            archive_dir: args.archive.archive_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_resolved_defaults() {
        let cli = Cli::parse_from(["service-broker-operator"]);
        let config = OperatorConfig::try_from(cli.operator).unwrap();
        let default = OperatorConfig::default();

        assert_eq!(config.restore_poll_interval, default.restore_poll_interval);
        assert_eq!(config.deployment_poll_interval, default.deployment_poll_interval);
        assert_eq!(config.archive, default.archive);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_archive_subcommand_and_overrides() {
        let cli = Cli::parse_from([
            "service-broker-operator",
            "--events-to-patch",
            "10",
            "--delete-attempts",
            "2",
            "archive-metered-events",
        ]);
        assert_eq!(cli.command, Some(Command::ArchiveMeteredEvents));

        let config = OperatorConfig::try_from(cli.operator).unwrap();
        assert_eq!(config.archive.events_to_patch, 10);
        assert_eq!(config.archive.delete_attempts, 2);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let cli = Cli::parse_from(["service-broker-operator", "--restore-poll-interval-secs", "0"]);
        assert!(matches!(
            OperatorConfig::try_from(cli.operator),
            Err(Error::Config(_))
        ));
    }
}
