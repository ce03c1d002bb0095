//! Background data refresh system
//!
//! Drives the poll → cache → append → prune cycle for one session on a timer.
//! The loop runs as a tokio task and is controlled through a [`RefreshHandle`]:
//! manual refresh requests, live config updates, and cancellation. Progress is
//! reported on a channel of [`RefreshMessage`]s.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace};

use crate::cache::PollCache;
use crate::fetch::{FetchError, Fetcher, ToSamples, MAX_RETRY_AFTER};
use crate::session::{self, SharedSession};

/// Shortest allowed refresh interval in seconds
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Longest allowed refresh interval in seconds
pub const MAX_INTERVAL_SECS: u64 = 120;

/// Refresh interval used when none is configured
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Capacity of the message channel; messages beyond it are dropped
const MESSAGE_CAPACITY: usize = 64;

/// Messages sent from the refresh task to the host
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A cycle started
    RefreshStarted {
        /// Whether the cycle was requested manually
        manual: bool,
    },
    /// The cycle produced a fresh payload
    SnapshotUpdated,
    /// The cycle failed; the session keeps its last good payload
    RefreshError(FetchError),
    /// The cycle was recorded and the scheduler settled into its next state
    RefreshCompleted,
    /// The scheduler moved to a new state
    StateChanged(SchedulerState),
}

/// Scheduler state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Parked until a manual refresh or until auto-refresh is enabled
    #[default]
    Idle,
    /// A fetch is in flight
    Fetching,
    /// Sleeping until the next auto-refresh
    Waiting,
}

/// Errors for invalid refresh configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The interval is outside the allowed range
    #[error("Invalid refresh interval: {secs}s. Allowed range: 10-120 seconds")]
    IntervalOutOfRange { secs: u64 },
}

/// User-adjustable refresh settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Seconds between auto-refresh cycles
    interval_secs: u64,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            enabled: false,
        }
    }
}

impl RefreshConfig {
    /// Creates a config, validating the interval
    ///
    /// # Returns
    /// * `Ok(RefreshConfig)` if `interval_secs` is within 10-120
    /// * `Err(ConfigError::IntervalOutOfRange)` otherwise
    pub fn new(interval_secs: u64, enabled: bool) -> Result<Self, ConfigError> {
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(ConfigError::IntervalOutOfRange { secs: interval_secs });
        }
        Ok(Self { interval_secs, enabled })
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns a copy with a different interval
    pub fn with_interval(self, interval_secs: u64) -> Result<Self, ConfigError> {
        Self::new(interval_secs, self.enabled)
    }

    /// Returns a copy with auto-refresh switched on or off
    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }
}

/// Construction-time scheduler settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Cache key polled every cycle
    pub request_key: String,
    /// Stretch the wait after a rate-limited cycle to the source's retry hint
    pub honor_retry_after: bool,
    /// Invalidate the cache entry before auto cycles too, not only manual ones
    pub refetch_on_tick: bool,
}

impl SchedulerOptions {
    pub fn new(request_key: impl Into<String>) -> Self {
        Self {
            request_key: request_key.into(),
            honor_retry_after: true,
            refetch_on_tick: false,
        }
    }
}

/// End of the previous cycle, used to schedule the next one
#[derive(Debug, Clone, Copy)]
struct CycleEnd {
    at: Instant,
    retry_after: Option<Duration>,
}

/// The refresh task
struct RefreshScheduler<F: Fetcher> {
    cache: Arc<PollCache<F>>,
    session: SharedSession<F::Output>,
    options: SchedulerOptions,
    config_rx: watch::Receiver<RefreshConfig>,
    trigger_rx: mpsc::Receiver<()>,
    state_tx: watch::Sender<SchedulerState>,
    events: mpsc::Sender<RefreshMessage>,
    cancel: CancellationToken,
}

impl<F> RefreshScheduler<F>
where
    F: Fetcher + 'static,
    F::Output: ToSamples,
{
    async fn run(mut self) {
        let mut last: Option<CycleEnd> = None;

        while let Some(manual) = self.next_cycle(last).await {
            if self.cancel.is_cancelled() {
                break;
            }
            let retry_after = self.cycle(manual).await;
            last = Some(CycleEnd {
                at: Instant::now(),
                retry_after,
            });

            let resting = if self.config().enabled {
                SchedulerState::Waiting
            } else {
                SchedulerState::Idle
            };
            self.set_state(resting);
            self.emit(RefreshMessage::RefreshCompleted);
        }

        self.set_state(SchedulerState::Idle);
        debug!("refresh loop stopped");
    }

    /// Waits until the next cycle is due
    ///
    /// # Returns
    /// * `Some(true)` for a manual refresh
    /// * `Some(false)` for an auto-refresh
    /// * `None` once cancelled
    async fn next_cycle(&mut self, last: Option<CycleEnd>) -> Option<bool> {
        loop {
            let config = *self.config_rx.borrow_and_update();
            let deadline = match (config.enabled, last) {
                (true, None) => return Some(false),
                (true, Some(end)) => Some(self.deadline_after(end, config)),
                (false, _) => None,
            };
            self.set_state(if deadline.is_some() {
                SchedulerState::Waiting
            } else {
                SchedulerState::Idle
            });

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                trigger = self.trigger_rx.recv() => return trigger.map(|()| true),
                changed = self.config_rx.changed() => {
                    changed.ok()?;
                    let updated = *self.config_rx.borrow();
                    debug!(?updated, "refresh config changed");
                    if updated.enabled && !config.enabled {
                        return Some(false);
                    }
                }
                _ = sleep_until(deadline) => return Some(false),
            }
        }
    }

    /// Runs one cycle and returns the retry hint of a rate-limited result
    async fn cycle(&self, manual: bool) -> Option<Duration> {
        let key = self.options.request_key.as_str();
        self.set_state(SchedulerState::Fetching);
        self.emit(RefreshMessage::RefreshStarted { manual });

        if manual || self.options.refetch_on_tick {
            self.cache.invalidate(key);
        }
        let result = self.cache.get(key).await;
        let now = Utc::now();

        let retry_after = result.as_ref().err().and_then(FetchError::retry_after);
        let message = match &result {
            Ok(_) => RefreshMessage::SnapshotUpdated,
            Err(err) => RefreshMessage::RefreshError(err.clone()),
        };
        info!(manual, ok = result.is_ok(), "refresh cycle complete");

        session::write(&self.session).record(result, now);
        self.emit(message);
        retry_after
    }

    fn wait_after(&self, config: RefreshConfig, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) if self.options.honor_retry_after => {
                config.interval().max(hint.min(MAX_RETRY_AFTER))
            }
            _ => config.interval(),
        }
    }

    /// When the next auto cycle is due after the cycle that ended at `end`
    fn deadline_after(&self, end: CycleEnd, config: RefreshConfig) -> Instant {
        let wait = self.wait_after(config, end.retry_after);
        end.at
            .checked_add(wait)
            .unwrap_or_else(|| end.at + config.interval())
    }

    fn config(&self) -> RefreshConfig {
        *self.config_rx.borrow()
    }

    fn set_state(&self, state: SchedulerState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(?state, "scheduler state changed");
            self.emit(RefreshMessage::StateChanged(state));
        }
    }

    fn emit(&self, message: RefreshMessage) {
        if self.events.try_send(message).is_err() {
            trace!("refresh message dropped");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle for controlling the background refresh system
///
/// Dropping the handle cancels the refresh task.
pub struct RefreshHandle<T> {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    session: SharedSession<T>,
    config_tx: watch::Sender<RefreshConfig>,
    trigger_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<SchedulerState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _cancel_on_drop: DropGuard,
}

impl<T> RefreshHandle<T>
where
    T: ToSamples + Clone + Send + Sync + 'static,
{
    /// Spawns the refresh task for `session`, polling `cache`
    ///
    /// With auto-refresh enabled the first cycle starts immediately; otherwise
    /// the task stays idle until a manual refresh or until auto-refresh is
    /// switched on.
    pub fn spawn<F>(
        cache: Arc<PollCache<F>>,
        session: SharedSession<T>,
        options: SchedulerOptions,
        config: RefreshConfig,
    ) -> Self
    where
        F: Fetcher<Output = T> + 'static,
    {
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_CAPACITY);
        let (config_tx, config_rx) = watch::channel(config);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let cancel = CancellationToken::new();

        let scheduler = RefreshScheduler {
            cache,
            session: session.clone(),
            options,
            config_rx,
            trigger_rx,
            state_tx,
            events: msg_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(scheduler.run());

        Self {
            receiver: msg_rx,
            session,
            config_tx,
            trigger_tx,
            state_rx,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

impl<T> RefreshHandle<T> {
    /// Requests an immediate refresh that bypasses the cache
    ///
    /// Requests made while a cycle is running start a new cycle right after it;
    /// several pending requests collapse into one.
    pub fn request_refresh(&self) {
        // A full channel already holds a pending request
        let _ = self.trigger_tx.try_send(());
    }

    /// Replaces the refresh config; takes effect at the next scheduling decision
    pub fn set_config(&self, config: RefreshConfig) {
        self.config_tx.send_replace(config);
    }

    pub fn config(&self) -> RefreshConfig {
        *self.config_tx.borrow()
    }

    /// Switches auto-refresh on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.set_config(self.config().with_enabled(enabled));
    }

    /// Changes the auto-refresh interval
    pub fn set_interval(&self, interval_secs: u64) -> Result<(), ConfigError> {
        self.set_config(self.config().with_interval(interval_secs)?);
        Ok(())
    }

    /// Current scheduler state
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// The session this task records into
    pub fn session(&self) -> &SharedSession<T> {
        &self.session
    }

    /// Whether the refresh task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the refresh task and waits for it to exit
    ///
    /// A fetch already in flight completes and is recorded; no new fetch starts.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(err) = (&mut self.task).await {
            debug!(error = %err, "refresh task ended abnormally");
        }
    }
}

/// Checks for pending refresh messages without blocking
///
/// # Arguments
/// * `handle` - The RefreshHandle to check
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv<T>(handle: &mut RefreshHandle<T>) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
