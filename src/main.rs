//! wxcache - Weather lookups with an offline cache
//!
//! Fetches OpenWeatherMap reports through a local cache. Fresh entries are
//! served without a network call; when the API is unreachable the last cached
//! payload is printed with an offline notice.

use std::error::Error;
use std::process::ExitCode;

use chrono::Duration as ChronoDuration;
use clap::Parser;

use wxcache::cache::{CacheEngine, FetchError};
use wxcache::cli::{Cli, Command, StartupConfig};
use wxcache::config::{AppConfig, ConfigError};
use wxcache::data::{suggestion_names, OpenWeatherSource, Report};
use wxcache::logging::init_logging;

/// Formats an age as a short human-readable string
fn format_age(age: std::time::Duration) -> String {
    let age = ChronoDuration::from_std(age).unwrap_or(ChronoDuration::zero());
    if age.num_days() > 0 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}m ago", age.num_minutes())
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let startup = StartupConfig::from_cli(&cli, &config)?;

    init_logging(&startup.log_level);

    // Without a key the source refuses every fetch, so only cached data is served
    let api_key = config.require_api_key().ok().map(str::to_string);
    let source = OpenWeatherSource::new(api_key.clone().unwrap_or_default())
        .with_base_url(config.base_url.clone())
        .with_history_base_url(config.history_base_url.clone());
    let engine = CacheEngine::new(&startup.cache_path, source)
        .with_fetch_timeout(startup.fetch_timeout);

    match startup.command {
        Command::Fetch(query) => {
            let fetched = engine
                .get(&query.cache_key(), startup.freshness_window)
                .await
                .map_err(|e| -> Box<dyn Error> {
                    match e {
                        FetchError::Network(_) if api_key.is_none() => {
                            ConfigError::MissingApiKey.into()
                        }
                        other => other.into(),
                    }
                })?;

            if let Some(cause) = fetched.degraded_cause() {
                eprintln!(
                    "Offline mode: loaded cached data due to network error ({}). Cached {}.",
                    cause,
                    format_age(engine.age_of(fetched.cached_at))
                );
            }

            if query.report == Report::Find {
                for name in suggestion_names(&fetched.data) {
                    println!("{}", name);
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&fetched.data)?);
            }
        }
        Command::Forget(query) => {
            if engine.invalidate(&query.cache_key()).await? {
                println!("Removed cached {} for {}", query.report.as_str(), query.location);
            } else {
                println!("No cached {} for {}", query.report.as_str(), query.location);
            }
        }
        Command::List => {
            for entry in engine.entries()? {
                println!("{}\t{}", entry.key, format_age(engine.age_of(entry.stored_at)));
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
