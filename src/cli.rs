//! Command-line interface parsing for wxcache
//!
//! This module handles parsing of CLI arguments using clap and merges them
//! with the loaded [`AppConfig`] into a [`StartupConfig`].

use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::AppConfig;
use crate::data::weather::{Report, Units, WeatherError, WeatherQuery};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// No location was given, or it was empty
    #[error("Location cannot be empty")]
    EmptyLocation,

    /// The unit system name is not recognized
    #[error("Invalid units: '{0}'. Valid units: metric, imperial, standard")]
    InvalidUnits(String),

    /// The report name is not recognized
    #[error("Invalid report: '{0}'. Valid reports: current, forecast, alerts, history, find")]
    InvalidReport(String),

    /// A time argument is neither RFC 3339 nor a plain date
    #[error("Invalid time: '{0}'. Use RFC 3339 (2024-07-01T06:00:00Z) or a date (2024-07-01)")]
    InvalidTime(String),

    /// `--report history` without both ends of the range
    #[error("History reports need both --start and --end")]
    MissingRange,

    /// `--start`/`--end` given for a report that has no range
    #[error("--start and --end only apply to --report history")]
    UnexpectedRange,

    /// The query is otherwise invalid
    #[error(transparent)]
    Query(WeatherError),
}

/// wxcache - Weather lookups with an offline cache
#[derive(Parser, Debug)]
#[command(name = "wxcache")]
#[command(about = "Weather lookups served from a local cache, with offline fallback")]
#[command(version)]
pub struct Cli {
    /// Location to look up, e.g. "Paris" or "Paris,FR"
    pub location: Option<String>,

    /// Unit system: metric, imperial or standard
    #[arg(short, long, value_name = "UNITS")]
    pub units: Option<String>,

    /// Report to fetch: current, forecast, alerts, history or find
    #[arg(short, long, value_name = "REPORT", default_value = "current")]
    pub report: String,

    /// Start of a history range (RFC 3339 or YYYY-MM-DD, UTC)
    #[arg(long, value_name = "TIME", value_parser = parse_time_arg)]
    pub start: Option<DateTime<Utc>>,

    /// End of a history range (RFC 3339 or YYYY-MM-DD, UTC)
    #[arg(long, value_name = "TIME", value_parser = parse_time_arg)]
    pub end: Option<DateTime<Utc>>,

    /// Serve cached data younger than this many minutes without refreshing
    #[arg(long, value_name = "MINUTES")]
    pub max_age: Option<u64>,

    /// Give up on the API after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Cache file to use instead of the configured one
    #[arg(long, value_name = "PATH")]
    pub cache_file: Option<PathBuf>,

    /// Config file to read instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Drop the cached entry for the query instead of fetching it
    #[arg(long)]
    pub forget: bool,

    /// List cached entries and their age
    #[arg(long, conflicts_with = "forget")]
    pub list: bool,

    /// Show debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the binary should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Look up a query through the cache
    Fetch(WeatherQuery),
    /// Invalidate the cached entry for a query
    Forget(WeatherQuery),
    /// Print every cached key
    List,
}

/// Configuration derived from CLI arguments and the config file
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub command: Command,
    pub freshness_window: Duration,
    pub fetch_timeout: Duration,
    pub cache_path: PathBuf,
    pub log_level: String,
}

/// Parses a unit system argument
pub fn parse_units_arg(s: &str) -> Result<Units, CliError> {
    s.parse()
        .map_err(|_: WeatherError| CliError::InvalidUnits(s.to_string()))
}

/// Parses a report argument
pub fn parse_report_arg(s: &str) -> Result<Report, CliError> {
    s.parse()
        .map_err(|_: WeatherError| CliError::InvalidReport(s.to_string()))
}

/// Parses a time argument; a bare date means midnight UTC
pub fn parse_time_arg(s: &str) -> Result<DateTime<Utc>, CliError> {
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| CliError::InvalidTime(s.to_string()))
}

/// Resolves `--report` together with the history range flags
fn report_from_cli(cli: &Cli) -> Result<Report, CliError> {
    if cli.report.eq_ignore_ascii_case("history") {
        let (Some(start), Some(end)) = (cli.start, cli.end) else {
            return Err(CliError::MissingRange);
        };
        return Report::history(start, end).map_err(CliError::Query);
    }
    if cli.start.is_some() || cli.end.is_some() {
        return Err(CliError::UnexpectedRange);
    }
    parse_report_arg(&cli.report)
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments
    ///
    /// CLI flags override values from `config`.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with the command to run
    /// * `Err(CliError)` for a missing location, unknown unit/report names or
    ///   a bad history range
    pub fn from_cli(cli: &Cli, config: &AppConfig) -> Result<Self, CliError> {
        let command = if cli.list {
            Command::List
        } else {
            let units = parse_units_arg(cli.units.as_deref().unwrap_or(&config.units))?;
            let report = report_from_cli(cli)?;
            let location = cli.location.clone().unwrap_or_default();
            let query = WeatherQuery::new(report, location, units).map_err(|e| match e {
                WeatherError::EmptyLocation => CliError::EmptyLocation,
                other => CliError::Query(other),
            })?;

            if cli.forget {
                Command::Forget(query)
            } else {
                Command::Fetch(query)
            }
        };

        let freshness_window = match cli.max_age {
            Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
            None => config.freshness_window(),
        };

        let fetch_timeout = match cli.timeout {
            Some(secs) => Duration::from_secs(secs),
            None => config.fetch_timeout(),
        };

        let cache_path = cli
            .cache_file
            .clone()
            .unwrap_or_else(|| config.cache_path());

        let log_level = if cli.verbose {
            "debug".to_string()
        } else {
            config.log_level.clone()
        };

        Ok(StartupConfig {
            command,
            freshness_window,
            fetch_timeout,
            cache_path,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup(args: &[&str]) -> Result<StartupConfig, CliError> {
        let cli = Cli::parse_from(args);
        StartupConfig::from_cli(&cli, &AppConfig::default())
    }

    #[test]
    fn test_parse_units_arg_aliases() {
        assert_eq!(parse_units_arg("metric").unwrap(), Units::Metric);
        assert_eq!(parse_units_arg("imperial").unwrap(), Units::Imperial);
        assert_eq!(parse_units_arg("F").unwrap(), Units::Imperial);
        assert_eq!(parse_units_arg("standard").unwrap(), Units::Standard);
    }

    #[test]
    fn test_parse_units_arg_invalid() {
        let err = parse_units_arg("cubits").unwrap_err();
        assert!(err.to_string().contains("Invalid units"));
        assert!(err.to_string().contains("cubits"));
    }

    #[test]
    fn test_parse_report_arg() {
        assert_eq!(parse_report_arg("forecast").unwrap(), Report::Forecast);
        assert!(parse_report_arg("radar").is_err());
    }

    #[test]
    fn test_cli_parse_location_only() {
        let cli = Cli::parse_from(["wxcache", "Paris"]);
        assert_eq!(cli.location.as_deref(), Some("Paris"));
        assert_eq!(cli.report, "current");
        assert!(cli.units.is_none());
        assert!(!cli.forget);
        assert!(!cli.list);
    }

    #[test]
    fn test_startup_defaults_come_from_config() {
        let config = startup(&["wxcache", "Paris"]).unwrap();
        assert_eq!(
            config.command,
            Command::Fetch(WeatherQuery::current("Paris", Units::Metric).unwrap())
        );
        assert_eq!(config.freshness_window, Duration::from_secs(30 * 60));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_startup_flags_override_config() {
        let config = startup(&[
            "wxcache",
            "Oslo",
            "--units",
            "imperial",
            "--report",
            "forecast",
            "--max-age",
            "5",
            "--timeout",
            "2",
            "--cache-file",
            "/tmp/wx.json",
            "-v",
        ])
        .unwrap();

        assert_eq!(
            config.command,
            Command::Fetch(WeatherQuery::new(Report::Forecast, "Oslo", Units::Imperial).unwrap())
        );
        assert_eq!(config.freshness_window, Duration::from_secs(300));
        assert_eq!(config.fetch_timeout, Duration::from_secs(2));
        assert_eq!(config.cache_path, PathBuf::from("/tmp/wx.json"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_startup_units_fall_back_to_config() {
        let cli = Cli::parse_from(["wxcache", "Austin"]);
        let app = AppConfig {
            units: "imperial".to_string(),
            ..Default::default()
        };
        let config = StartupConfig::from_cli(&cli, &app).unwrap();
        assert_eq!(
            config.command,
            Command::Fetch(WeatherQuery::current("Austin", Units::Imperial).unwrap())
        );
    }

    #[test]
    fn test_startup_missing_location() {
        assert!(matches!(startup(&["wxcache"]), Err(CliError::EmptyLocation)));
        assert!(matches!(
            startup(&["wxcache", ""]),
            Err(CliError::EmptyLocation)
        ));
    }

    #[test]
    fn test_startup_forget_and_list() {
        let config = startup(&["wxcache", "Paris", "--forget"]).unwrap();
        assert!(matches!(config.command, Command::Forget(_)));

        let config = startup(&["wxcache", "--list"]).unwrap();
        assert_eq!(config.command, Command::List);
    }

    #[test]
    fn test_list_conflicts_with_forget() {
        let result = Cli::try_parse_from(["wxcache", "Paris", "--list", "--forget"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_time_arg() {
        assert_eq!(
            parse_time_arg("2024-07-01").unwrap(),
            "2024-07-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            parse_time_arg("2024-07-01T08:00:00+02:00").unwrap(),
            "2024-07-01T06:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert!(matches!(
            parse_time_arg("yesterday"),
            Err(CliError::InvalidTime(_))
        ));
    }

    #[test]
    fn test_startup_history_report() {
        let config = startup(&[
            "wxcache",
            "Paris",
            "--report",
            "history",
            "--start",
            "2024-07-01",
            "--end",
            "2024-07-02",
        ])
        .unwrap();

        match config.command {
            Command::Fetch(query) => {
                assert_eq!(
                    query.report,
                    Report::History {
                        start: 1_719_792_000,
                        end: 1_719_878_400
                    }
                );
                assert_eq!(query.cache_key(), "history:1719792000:1719878400|metric|Paris");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_startup_history_range_errors() {
        assert!(matches!(
            startup(&["wxcache", "Paris", "--report", "history", "--start", "2024-07-01"]),
            Err(CliError::MissingRange)
        ));
        assert!(matches!(
            startup(&["wxcache", "Paris", "--end", "2024-07-01"]),
            Err(CliError::UnexpectedRange)
        ));
        assert!(matches!(
            startup(&[
                "wxcache", "Paris", "-r", "history", "--start", "2024-07-02", "--end", "2024-07-01",
            ]),
            Err(CliError::Query(WeatherError::InvalidRange { .. }))
        ));
    }

    #[test]
    fn test_startup_find_rejects_short_search() {
        let result = startup(&["wxcache", "Pa", "--report", "find"]);
        assert!(matches!(
            result,
            Err(CliError::Query(WeatherError::QueryTooShort(_)))
        ));
        let config = startup(&["wxcache", "Par", "--report", "find"]).unwrap();
        assert!(matches!(config.command, Command::Fetch(ref q) if q.report == Report::Find));
    }

    #[test]
    fn test_startup_invalid_report() {
        let result = startup(&["wxcache", "Paris", "--report", "radar"]);
        assert!(matches!(result, Err(CliError::InvalidReport(_))));
    }
}
