//! OpenWeatherMap API client
//!
//! This module turns cache keys into OpenWeatherMap requests. Payloads are
//! returned as raw JSON; only the `cod`/`message` envelope is inspected, to
//! tell API-level failures (such as an unknown city) from real answers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::source::{RemoteSource, SourceError};

/// Base URL for the OpenWeatherMap API
pub const OPEN_WEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Base URL for the OpenWeatherMap history API, which lives on its own host
pub const OPEN_WEATHER_HISTORY_URL: &str = "https://history.openweathermap.org/data/2.5";

/// Shortest location the `find` endpoint is asked about
pub const MIN_FIND_QUERY_LEN: usize = 3;

/// Separator between the parts of a cache key
const KEY_SEPARATOR: char = '|';

/// Errors building a weather query
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WeatherError {
    /// The location was empty
    #[error("Location cannot be empty")]
    EmptyLocation,

    /// Unrecognized report name
    #[error("Invalid report: '{0}'. Valid reports: current, forecast, alerts, history, find")]
    UnknownReport(String),

    /// A history range that ends before it starts
    #[error("Invalid history range: {start} is after {end}")]
    InvalidRange { start: i64, end: i64 },

    /// A location search shorter than the API accepts
    #[error("Search '{0}' is too short; use at least 3 characters")]
    QueryTooShort(String),

    /// Unrecognized unit system
    #[error("Invalid units: '{0}'. Valid units: metric, imperial, standard")]
    UnknownUnits(String),

    /// The cache key does not encode a query
    #[error("Malformed cache key: '{0}'")]
    MalformedKey(String),
}

/// Which OpenWeatherMap report to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Report {
    /// Current conditions
    #[default]
    Current,
    /// 5-day / 3-hour forecast
    Forecast,
    /// Active weather alerts
    Alerts,
    /// Hourly observations between two Unix timestamps (seconds, inclusive)
    History { start: i64, end: i64 },
    /// Locations whose name matches the query, for suggestions
    Find,
}

impl Report {
    /// Builds a history report, rejecting a range that ends before it starts
    pub fn history(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WeatherError> {
        Self::history_from_timestamps(start.timestamp(), end.timestamp())
    }

    fn history_from_timestamps(start: i64, end: i64) -> Result<Self, WeatherError> {
        if start > end {
            return Err(WeatherError::InvalidRange { start, end });
        }
        Ok(Report::History { start, end })
    }

    /// Report name used on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Report::Current => "current",
            Report::Forecast => "forecast",
            Report::Alerts => "alerts",
            Report::History { .. } => "history",
            Report::Find => "find",
        }
    }

    /// API path segment for this report
    pub fn api_path(&self) -> &'static str {
        match self {
            Report::Current => "weather",
            Report::Forecast => "forecast",
            Report::Alerts => "alerts",
            Report::History { .. } => "history/city",
            Report::Find => "find",
        }
    }

    /// Whether the endpoint takes a `units` parameter
    fn uses_units(&self) -> bool {
        !matches!(self, Report::Alerts | Report::Find)
    }
}

/// Cache key form: the name, with `:start:end` appended for history
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::History { start, end } => write!(f, "history:{}:{}", start, end),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for Report {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(range) = s.strip_prefix("history:") {
            let unknown = || WeatherError::UnknownReport(s.to_string());
            let (start, end) = range.split_once(':').ok_or_else(unknown)?;
            let start = start.parse().map_err(|_| unknown())?;
            let end = end.parse().map_err(|_| unknown())?;
            return Self::history_from_timestamps(start, end);
        }

        match s.to_lowercase().as_str() {
            "current" | "now" | "weather" => Ok(Report::Current),
            "forecast" => Ok(Report::Forecast),
            "alerts" | "alert" => Ok(Report::Alerts),
            "find" | "search" => Ok(Report::Find),
            _ => Err(WeatherError::UnknownReport(s.to_string())),
        }
    }
}

/// Unit system sent to the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Units {
    /// Celsius, m/s
    #[default]
    Metric,
    /// Fahrenheit, mph
    Imperial,
    /// Kelvin, m/s
    Standard,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" | "c" | "celsius" => Ok(Units::Metric),
            "imperial" | "f" | "fahrenheit" => Ok(Units::Imperial),
            "standard" | "k" | "kelvin" => Ok(Units::Standard),
            _ => Err(WeatherError::UnknownUnits(s.to_string())),
        }
    }
}

/// A single weather lookup
///
/// The location is kept exactly as given. `"Paris"` and `"paris "` are
/// different queries with different cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherQuery {
    pub report: Report,
    pub location: String,
    pub units: Units,
}

impl WeatherQuery {
    /// Creates a query, rejecting an empty location and searches shorter
    /// than [`MIN_FIND_QUERY_LEN`]
    pub fn new(
        report: Report,
        location: impl Into<String>,
        units: Units,
    ) -> Result<Self, WeatherError> {
        let location = location.into();
        if location.is_empty() {
            return Err(WeatherError::EmptyLocation);
        }
        if report == Report::Find && location.chars().count() < MIN_FIND_QUERY_LEN {
            return Err(WeatherError::QueryTooShort(location));
        }
        Ok(Self {
            report,
            location,
            units,
        })
    }

    /// Creates a current-conditions query
    pub fn current(location: impl Into<String>, units: Units) -> Result<Self, WeatherError> {
        Self::new(Report::Current, location, units)
    }

    /// Cache key for this query: `report|units|location`
    ///
    /// The location goes last so it may itself contain the separator. History
    /// reports carry their range in the report part (`history:start:end`).
    pub fn cache_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.report,
            self.units,
            self.location,
            sep = KEY_SEPARATOR
        )
    }

    /// Parses a key produced by [`WeatherQuery::cache_key`]
    pub fn from_cache_key(key: &str) -> Result<Self, WeatherError> {
        let mut parts = key.splitn(3, KEY_SEPARATOR);
        let (Some(report), Some(units), Some(location)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(WeatherError::MalformedKey(key.to_string()));
        };

        Self::new(report.parse()?, location, units.parse()?)
    }
}

/// Names of the places in a `find` payload, in API order
pub fn suggestion_names(payload: &Value) -> Vec<String> {
    payload
        .get("list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Client for fetching weather data from the OpenWeatherMap API
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    client: Client,
    api_key: String,
    base_url: String,
    history_base_url: String,
}

impl OpenWeatherSource {
    /// Creates a source authenticated with `api_key`
    ///
    /// An empty key is accepted; every fetch then fails without touching the
    /// network, which leaves the cache usable.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    /// Creates a source with a custom HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: OPEN_WEATHER_BASE_URL.to_string(),
            history_base_url: OPEN_WEATHER_HISTORY_URL.to_string(),
        }
    }

    /// Points the source at a different API root (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Points history lookups at a different API root
    pub fn with_history_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.history_base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, report: Report) -> String {
        let root = match report {
            Report::History { .. } => &self.history_base_url,
            _ => &self.base_url,
        };
        format!("{}/{}", root.trim_end_matches('/'), report.api_path())
    }

    /// Fetches the raw payload for `query`
    ///
    /// # Returns
    /// * `Ok(Value)` - the response body
    /// * `Err(SourceError)` - no API key, transport failure, non-success
    ///   status, a body that is not JSON, or an API error envelope
    pub async fn fetch_query(&self, query: &WeatherQuery) -> Result<Value, SourceError> {
        if self.api_key.trim().is_empty() {
            return Err(SourceError::Unavailable("No API key configured".to_string()));
        }

        let url = self.url_for(query.report);

        let mut params = vec![
            ("q", query.location.clone()),
            ("appid", self.api_key.clone()),
        ];
        if query.report.uses_units() {
            params.push(("units", query.units.as_str().to_string()));
        }
        if let Report::History { start, end } = query.report {
            params.push(("type", "hour".to_string()));
            params.push(("start", start.to_string()));
            params.push(("end", end.to_string()));
        }

        debug!(report = %query.report, location = %query.location, units = %query.units, "Requesting weather");

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        parse_body(status.as_u16(), status.is_success(), body)
    }
}

#[async_trait]
impl RemoteSource for OpenWeatherSource {
    async fn fetch(&self, key: &str) -> Result<Value, SourceError> {
        let query = WeatherQuery::from_cache_key(key)
            .map_err(|e| SourceError::InvalidQuery(e.to_string()))?;
        self.fetch_query(&query).await
    }
}

/// Classifies a response body
///
/// An error envelope wins over the HTTP status, since the API sends
/// `{"cod": "404", "message": "city not found"}` with a 404.
fn parse_body(status: u16, success: bool, body: String) -> Result<Value, SourceError> {
    let parsed = serde_json::from_str::<Value>(&body);

    if let Ok(value) = &parsed {
        check_api_code(value)?;
    }

    if !success {
        return Err(SourceError::Status { status, body });
    }

    parsed.map_err(|e| SourceError::Malformed(e.to_string()))
}

/// Fails when the payload carries a `cod` other than 200
///
/// `cod` is a number on some endpoints and a string on others.
fn check_api_code(value: &Value) -> Result<(), SourceError> {
    let Some(cod) = value.get("cod") else {
        return Ok(());
    };

    let code = match cod {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if code == "200" {
        return Ok(());
    }

    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string();

    Err(SourceError::Api { code, message })
}
