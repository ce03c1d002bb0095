//! Command-line interface parsing for livepoll
//!
//! This module handles parsing of CLI arguments using clap, turning them into a
//! validated [`StartupConfig`], and parsing the single-line commands accepted on
//! stdin while the poller runs.

use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::cache::{PRICE_CACHE_TTL, WEATHER_CACHE_TTL};
use crate::fetch::prices::{DEFAULT_COINS, DEFAULT_VS_CURRENCY};
use crate::fetch::weather::{DEFAULT_LATITUDE, DEFAULT_LOCATION, DEFAULT_LONGITUDE};
use crate::refresh::{ConfigError, RefreshConfig, DEFAULT_INTERVAL_SECS};
use crate::render::OutputFormat;
use crate::session::{
    MAX_HISTORY_WINDOW_MINUTES, PRICE_HISTORY_WINDOW_MINUTES, WEATHER_HISTORY_WINDOW_MINUTES,
};

/// Error types for CLI argument parsing
#[derive(Debug, Error, PartialEq)]
pub enum CliError {
    /// The refresh interval is out of range
    #[error(transparent)]
    InvalidInterval(#[from] ConfigError),

    /// The history window is out of range
    #[error("Invalid history window: {0} minutes. Allowed range: 1-10080 minutes")]
    InvalidWindow(i64),

    /// Latitude or longitude outside the valid range
    #[error("Invalid coordinates: latitude {lat}, longitude {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    /// A coin id was empty, e.g. from `--coins bitcoin,,ethereum`
    #[error("Invalid coin list: coin ids must not be empty")]
    EmptyCoin,
}

/// livepoll - poll a live data source with caching, rolling history, and deltas
#[derive(Parser, Debug)]
#[command(name = "livepoll")]
#[command(about = "Poll a live data source with caching, rolling history, and deltas")]
#[command(version)]
pub struct Cli {
    /// Seconds between auto-refresh cycles (10-120)
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        env = "LIVEPOLL_INTERVAL",
        default_value_t = DEFAULT_INTERVAL_SECS
    )]
    pub interval: u64,

    /// Enable auto-refresh at startup
    #[arg(long, global = true)]
    pub auto: bool,

    /// Override the cache TTL of the source
    #[arg(long, global = true, value_name = "SECS")]
    pub ttl: Option<u64>,

    /// Override the history window of the source
    #[arg(long, global = true, value_name = "MINUTES", allow_negative_numbers = true)]
    pub window_minutes: Option<i64>,

    /// Exit after this many completed refresh cycles
    #[arg(long, global = true, value_name = "N")]
    pub cycles: Option<u64>,

    /// Bypass the cache on auto-refresh cycles too, not only on manual refresh
    #[arg(long, global = true)]
    pub refetch_on_tick: bool,

    /// Print one JSON object per cycle instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Data source to poll (defaults to prices)
    #[command(subcommand)]
    pub source: Option<SourceCommand>,
}

/// Data sources selectable from the command line
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SourceCommand {
    /// Cryptocurrency spot prices from CoinGecko
    Prices {
        /// Comma-separated CoinGecko coin ids (default: bitcoin,ethereum)
        #[arg(long, value_delimiter = ',')]
        coins: Vec<String>,

        /// Quote currency
        #[arg(long, default_value = DEFAULT_VS_CURRENCY)]
        vs: String,
    },
    /// Current temperature and wind from Open-Meteo
    Weather {
        /// Latitude of the location
        #[arg(long, default_value_t = DEFAULT_LATITUDE, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude of the location
        #[arg(long, default_value_t = DEFAULT_LONGITUDE, allow_negative_numbers = true)]
        lon: f64,

        /// Label used as the series name
        #[arg(long, default_value = DEFAULT_LOCATION)]
        label: String,
    },
}

/// A validated data source
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Prices { coins: Vec<String>, vs: String },
    Weather { lat: f64, lon: f64, label: String },
}

impl Source {
    fn default_ttl(&self) -> Duration {
        match self {
            Source::Prices { .. } => PRICE_CACHE_TTL,
            Source::Weather { .. } => WEATHER_CACHE_TTL,
        }
    }

    fn default_window_minutes(&self) -> i64 {
        match self {
            Source::Prices { .. } => PRICE_HISTORY_WINDOW_MINUTES,
            Source::Weather { .. } => WEATHER_HISTORY_WINDOW_MINUTES,
        }
    }
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone, PartialEq)]
pub struct StartupConfig {
    /// Initial refresh settings
    pub refresh: RefreshConfig,
    /// Source to poll
    pub source: Source,
    /// Cache TTL
    pub ttl: Duration,
    /// History window
    pub window: chrono::Duration,
    /// Stop after this many cycles
    pub max_cycles: Option<u64>,
    /// Whether auto cycles bypass the cache
    pub refetch_on_tick: bool,
    /// Output format
    pub output: OutputFormat,
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError)` if an argument is out of range
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let refresh = RefreshConfig::new(cli.interval, cli.auto)?;

        let source = match &cli.source {
            None => Source::Prices {
                coins: DEFAULT_COINS.iter().map(|c| c.to_string()).collect(),
                vs: DEFAULT_VS_CURRENCY.to_string(),
            },
            Some(SourceCommand::Prices { coins, vs }) => {
                if coins.iter().any(|c| c.trim().is_empty()) {
                    return Err(CliError::EmptyCoin);
                }
                let coins = if coins.is_empty() {
                    DEFAULT_COINS.iter().map(|c| c.to_string()).collect()
                } else {
                    coins.iter().map(|c| c.trim().to_lowercase()).collect()
                };
                Source::Prices {
                    coins,
                    vs: vs.to_lowercase(),
                }
            }
            Some(SourceCommand::Weather { lat, lon, label }) => {
                if !(-90.0..=90.0).contains(lat) || !(-180.0..=180.0).contains(lon) {
                    return Err(CliError::InvalidCoordinates { lat: *lat, lon: *lon });
                }
                Source::Weather {
                    lat: *lat,
                    lon: *lon,
                    label: label.clone(),
                }
            }
        };

        let window_minutes = cli.window_minutes.unwrap_or_else(|| source.default_window_minutes());
        if !(1..=MAX_HISTORY_WINDOW_MINUTES).contains(&window_minutes) {
            return Err(CliError::InvalidWindow(window_minutes));
        }

        Ok(StartupConfig {
            refresh,
            ttl: cli.ttl.map(Duration::from_secs).unwrap_or_else(|| source.default_ttl()),
            window: chrono::Duration::minutes(window_minutes),
            max_cycles: cli.cycles,
            refetch_on_tick: cli.refetch_on_tick,
            output: if cli.json { OutputFormat::Json } else { OutputFormat::Text },
            source,
        })
    }
}

/// Commands accepted on stdin while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Refresh now, bypassing the cache
    Refresh,
    /// Switch auto-refresh on or off
    ToggleAuto,
    /// Change the auto-refresh interval
    Interval(u64),
    /// Stop polling and exit
    Quit,
}

/// Parses one line of stdin input into a control command.
///
/// Accepts `r`/`refresh`, `a`/`auto`, `i <secs>`/`interval <secs>`, and
/// `q`/`quit`. Returns `None` for anything else.
pub fn parse_control(line: &str) -> Option<Control> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?.to_lowercase();
    let arg = parts.next();
    if parts.next().is_some() {
        return None;
    }

    match (command.as_str(), arg) {
        ("r" | "refresh", None) => Some(Control::Refresh),
        ("a" | "auto", None) => Some(Control::ToggleAuto),
        ("q" | "quit", None) => Some(Control::Quit),
        ("i" | "interval", Some(secs)) => secs.parse().ok().map(Control::Interval),
        _ => None,
    }
}
