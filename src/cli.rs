//! Command-line interface for vcstat

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// vcstat - VMware vCenter status collector
///
/// Polls a vCenter endpoint and writes one record per entity to stdout,
/// ready for a telegraf `execd` input.
#[derive(Parser, Debug, Clone)]
#[command(name = "vcstat")]
#[command(version)]
#[command(about = "Gathers status and basic stats from VMware vCenter", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long, env = "VCSTAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Polling interval, overriding the configuration (e.g. 30s, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Run a single gather cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Record output format
    #[arg(long, value_enum, default_value = "influx")]
    pub format: OutputFormat,

    /// Print a sample configuration and exit
    #[arg(long)]
    pub sample_config: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format on stderr
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Output format for records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// InfluxDB line protocol
    #[default]
    Influx,
    /// One JSON object per line
    Json,
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let d = humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["vcstat"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Influx);
        assert!(!cli.once);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_poll_interval() {
        let cli = Cli::try_parse_from(["vcstat", "--poll-interval", "30s", "--once", "-vv"]).unwrap();
        assert_eq!(cli.poll_interval, Some(Duration::from_secs(30)));
        assert!(cli.once);
        assert_eq!(cli.verbose, 2);

        assert!(Cli::try_parse_from(["vcstat", "--poll-interval", "0s"]).is_err());
        assert!(Cli::try_parse_from(["vcstat", "--format", "xml"]).is_err());
    }
}
