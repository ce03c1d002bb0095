//! livepoll - poll a live data source with caching, rolling history, and deltas
//!
//! Prints the source's current data and per-series deltas after every refresh
//! cycle. While running, single-line commands on stdin control the poller:
//! `r` refreshes now, `a` toggles auto-refresh, `i <secs>` sets the interval,
//! and `q` quits.

use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use livepoll::cache::PollCache;
use livepoll::cli::{parse_control, Cli, Control, Source, StartupConfig};
use livepoll::fetch::{Fetcher, PriceFetcher, ToSamples, WeatherFetcher};
use livepoll::refresh::{RefreshHandle, RefreshMessage, SchedulerOptions};
use livepoll::render::{render_json, render_text, Describe, OutputFormat};
use livepoll::session::{self, Session};

/// Sets up tracing to stderr; `RUST_LOG` overrides the verbosity flag
fn init_logging(verbose: bool) {
    let default_level = if verbose { "livepoll=debug" } else { "livepoll=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match StartupConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(2);
        }
    };

    match config.source.clone() {
        Source::Prices { coins, vs } => run(PriceFetcher::new(coins, vs), config).await,
        Source::Weather { lat, lon, label } => {
            run(WeatherFetcher::new(lat, lon, label), config).await
        }
    }
}

/// Polls one source until quit, ctrl-c, or the configured number of cycles
async fn run<F>(fetcher: F, config: StartupConfig) -> Result<(), Box<dyn std::error::Error>>
where
    F: Fetcher + RequestUrl + 'static,
    F::Output: ToSamples + Describe + Serialize,
{
    let mut options = SchedulerOptions::new(fetcher.request_url());
    options.refetch_on_tick = config.refetch_on_tick;

    let shared = Session::new(config.window)
        .with_fallback(fetcher.fallback())
        .with_series(fetcher.series_keys())
        .shared();
    let cache = Arc::new(PollCache::new(fetcher, config.ttl));

    info!(
        key = %options.request_key,
        interval_secs = config.refresh.interval_secs(),
        auto = config.refresh.enabled,
        "starting poller"
    );
    let mut handle = RefreshHandle::spawn(cache, shared, options, config.refresh);

    // Show something right away even with auto-refresh off
    if !config.refresh.enabled {
        handle.request_refresh();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut completed = 0u64;

    loop {
        tokio::select! {
            message = handle.receiver.recv() => match message {
                Some(RefreshMessage::RefreshCompleted) => {
                    let guard = session::read(handle.session());
                    match config.output {
                        OutputFormat::Text => println!("{}", render_text(&guard)),
                        OutputFormat::Json => println!("{}", render_json(&guard)),
                    }
                    drop(guard);

                    completed += 1;
                    if config.max_cycles.is_some_and(|max| completed >= max) {
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_control(&line) {
                    Some(Control::Refresh) => handle.request_refresh(),
                    Some(Control::ToggleAuto) => {
                        let enabled = !handle.config().enabled;
                        handle.set_enabled(enabled);
                        info!(enabled, "auto-refresh toggled");
                    }
                    Some(Control::Interval(secs)) => match handle.set_interval(secs) {
                        Ok(()) => info!(interval_secs = secs, "interval changed"),
                        Err(err) => warn!(error = %err, "interval not changed"),
                    },
                    Some(Control::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => {
                        warn!(input = %line.trim(), "unknown command; use r, a, i <secs>, or q")
                    }
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Sources whose request URL identifies their cache entry
trait RequestUrl {
    fn request_url(&self) -> String;
}

impl RequestUrl for PriceFetcher {
    fn request_url(&self) -> String {
        self.url()
    }
}

impl RequestUrl for WeatherFetcher {
    fn request_url(&self) -> String {
        self.url()
    }
}
