//! Background update scheduler
//!
//! Stopped -> Running -> Stopped. While running, a single loop wakes every
//! tick and, once the check interval has elapsed, runs an update check in
//! its own task. A crashed cycle is logged and followed by the error
//! backoff. `stop()` cancels the loop through a watch channel, which aborts
//! an in-flight cycle.
//!
//! Status and callback registration never take the manager lock, which an
//! update cycle holds for as long as its provider requests run.

use crate::backup_store::VersionMap;
use crate::retry::{RetryDecision, RetryTracker};
use crate::signal_handlers;
use crate::subscriber::{LoggingSubscriber, SubscriberList, UpdateSubscriber};
use crate::update_manager::{database_status, UpdateManager};
use chrono::{DateTime, Utc};
use nutri_common::{DatabaseStatus, UpdateConfig, UpdateOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Scheduler timing and retry settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub update_interval: Duration,
    pub retry_interval: Duration,
    pub tick: Duration,
    pub error_backoff: Duration,
    pub max_retries: u32,
    pub handle_signals: bool,
}

impl From<&UpdateConfig> for SchedulerConfig {
    fn from(config: &UpdateConfig) -> Self {
        Self {
            update_interval: config.update_interval(),
            retry_interval: config.retry_interval(),
            tick: config.tick(),
            error_backoff: config.error_backoff(),
            max_retries: config.max_retries,
            handle_signals: config.handle_signals,
        }
    }
}

/// Read-only scheduler snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub update_interval_hours: f64,
    pub retry_counts: BTreeMap<String, u32>,
    pub databases: BTreeMap<String, DatabaseStatus>,
}

struct LoopHandle {
    task: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

pub struct UpdateScheduler {
    manager: Arc<Mutex<UpdateManager>>,
    versions: watch::Receiver<VersionMap>,
    subscribers: SubscriberList,
    config: SchedulerConfig,
    running: AtomicBool,
    running_tx: watch::Sender<bool>,
    last_check: StdMutex<Option<DateTime<Utc>>>,
    retries: StdMutex<RetryTracker>,
    update_loop: StdMutex<Option<LoopHandle>>,
    signals_installed: AtomicBool,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UpdateScheduler {
    /// Wrap `manager`; a logging subscriber is registered on it
    pub fn new(manager: UpdateManager, config: SchedulerConfig) -> Arc<Self> {
        manager.add_subscriber(Arc::new(LoggingSubscriber));
        let (running_tx, _) = watch::channel(false);

        Arc::new(Self {
            versions: manager.watch_versions(),
            subscribers: manager.subscribers(),
            manager: Arc::new(Mutex::new(manager)),
            retries: StdMutex::new(RetryTracker::new(config.max_retries)),
            config,
            running: AtomicBool::new(false),
            running_tx,
            last_check: StdMutex::new(None),
            update_loop: StdMutex::new(None),
            signals_installed: AtomicBool::new(false),
        })
    }

    /// Shared handle to the managed update manager
    pub fn manager(&self) -> Arc<Mutex<UpdateManager>> {
        Arc::clone(&self.manager)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch the background loop; no-op if already running
    pub fn start(self: &Arc<Self>) {
        {
            // Flag and handle change together, so a concurrent stop() sees both
            let mut update_loop = lock(&self.update_loop);
            if self.running.swap(true, Ordering::SeqCst) {
                warn!("Update scheduler is already running");
                return;
            }

            let (cancel, cancel_rx) = watch::channel(false);
            let this = Arc::clone(self);
            let task = tokio::spawn(async move { this.run_loop(cancel_rx).await });
            *update_loop = Some(LoopHandle { task, cancel });
            self.running_tx.send_replace(true);
        }

        if self.config.handle_signals {
            self.install_signal_handlers();
        }

        info!(
            "Database update scheduler started (interval: {:.1}h)",
            self.config.update_interval.as_secs_f64() / 3600.0
        );
    }

    /// Cancel the loop, wait for it, then close the manager; no-op if stopped
    pub async fn stop(&self) {
        let handle = {
            let mut update_loop = lock(&self.update_loop);
            if !self.running.swap(false, Ordering::SeqCst) {
                return;
            }
            update_loop.take()
        };
        info!("Stopping database update scheduler...");

        if let Some(LoopHandle { task, cancel }) = handle {
            cancel.send_replace(true);
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Update loop ended abnormally: {}", e);
                }
            }
        }

        self.manager.lock().await.close().await;
        {
            // A start() racing this stop() may already be running again
            let _update_loop = lock(&self.update_loop);
            self.running_tx.send_replace(self.is_running());
        }
        info!("Database update scheduler stopped");
    }

    /// Resolve once the scheduler is stopped
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.running_tx.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn install_signal_handlers(self: &Arc<Self>) {
        if self.signals_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        signal_handlers::spawn_shutdown_handler(Arc::downgrade(self));
    }

    /// Allow a restarted scheduler to listen for signals again
    pub(crate) fn signal_listener_finished(&self) {
        self.signals_installed.store(false, Ordering::SeqCst);
    }

    async fn run_loop(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        while self.is_running() {
            let now = Utc::now();
            let mut pause = self.config.tick;

            if self.check_due(now) {
                let this = Arc::clone(&self);
                let mut cycle = tokio::spawn(async move { this.run_update_check().await });

                tokio::select! {
                    result = &mut cycle => match result {
                        Ok(()) => {
                            *lock(&self.last_check) = Some(now);
                        }
                        Err(e) => {
                            error!("Error in update loop: {}", e);
                            pause = self.config.error_backoff;
                        }
                    },
                    _ = cancel.changed() => {
                        cycle.abort();
                        info!("Update loop cancelled during update check");
                        return;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.changed() => {
                    info!("Update loop cancelled");
                    return;
                }
            }
        }
    }

    /// Current check interval: the retry interval while retries are pending
    fn check_interval(&self) -> Duration {
        if lock(&self.retries).any_pending() {
            self.config.retry_interval.min(self.config.update_interval)
        } else {
            self.config.update_interval
        }
    }

    fn check_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = *lock(&self.last_check) else {
            return true;
        };
        let elapsed = now
            .signed_duration_since(last)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed >= self.check_interval()
    }

    async fn run_update_check(&self) {
        info!("Checking for database updates...");
        let due = self.manager.lock().await.check_for_updates();

        if !due.values().any(|d| *d) {
            info!("No database updates available");
            return;
        }

        for (source, is_due) in due {
            if is_due {
                self.update_source(&source).await;
            }
        }
    }

    async fn update_source(&self, source: &str) {
        let attempt = lock(&self.retries).count(source) + 1;
        info!("Running update for {} (attempt {})", source, attempt);

        let outcome = self.manager.lock().await.update_database(source, false).await;
        if outcome.success {
            lock(&self.retries).record_success(source);
        } else {
            self.handle_update_failure(source, &outcome.errors);
        }
    }

    /// Count a failed update of `source`
    pub fn handle_update_failure(&self, source: &str, errors: &[String]) -> RetryDecision {
        let decision = lock(&self.retries).record_failure(source);
        match decision {
            RetryDecision::Exhausted { attempts } => error!(
                "Max retries exceeded for {} updates after {} attempts. Errors: {:?}",
                source, attempts, errors
            ),
            RetryDecision::WillRetry { attempt } => warn!(
                "Update failed for {} (attempt {}/{}), retrying in {} minutes. Errors: {:?}",
                source,
                attempt,
                self.config.max_retries,
                self.config.retry_interval.as_secs() / 60,
                errors
            ),
        }
        decision
    }

    /// Update `source` (or every source) now, bypassing interval and checksum checks
    pub async fn force_update(&self, source: Option<&str>) -> BTreeMap<String, UpdateOutcome> {
        let mut manager = self.manager.lock().await;
        let sources = match source {
            Some(source) => vec![source.to_string()],
            None => manager.sources(),
        };

        let mut outcomes = BTreeMap::new();
        for source in sources {
            info!("Forcing update for {}", source);
            let outcome = manager.update_database(&source, true).await;
            outcomes.insert(source, outcome);
        }
        outcomes
    }

    /// Register `subscriber`; takes effect even while a cycle is running
    pub fn add_update_callback(&self, subscriber: Arc<dyn UpdateSubscriber>) {
        self.subscribers.add(subscriber);
    }

    pub fn retry_count(&self, source: &str) -> u32 {
        lock(&self.retries).count(source)
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let databases = database_status(&self.versions.borrow(), Utc::now());
        SchedulerStatus {
            is_running: self.is_running(),
            last_check: *lock(&self.last_check),
            update_interval_hours: self.config.update_interval.as_secs_f64() / 3600.0,
            retry_counts: lock(&self.retries).snapshot(),
            databases,
        }
    }
}
