//! Background cache refresh
//!
//! `CacheRefresher::sweep` re-fetches every cached configuration with its
//! version token, so unchanged configurations cost a round-trip but no
//! download. `RefreshScheduler` runs sweeps on a timer.
//!
//! A sweep spawns one task per cached key with no upper bound on
//! concurrency; the number of in-flight store calls equals the number of
//! cached configurations, which is capped only by the cache capacity.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{BoundedCache, CachedConfiguration, EntryOrigin};
use crate::error::CoreError;
use crate::source::ConfigurationSource;

/// Shared cache of configurations keyed by name
pub type ConfigurationCache = BoundedCache<String, CachedConfiguration>;

/// Result of refreshing a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Unchanged,
    Evicted,
    Skipped,
    Failed,
}

/// Summary of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries overwritten with new content
    pub refreshed: usize,
    /// Entries whose version was still current
    pub unchanged: usize,
    /// Entries removed because the configuration no longer exists
    pub evicted: usize,
    /// Keys evicted from the cache between the snapshot and their refresh
    pub skipped: usize,
    /// Store errors; the entry was kept
    pub failed: usize,
    /// Tasks that panicked; the entry was kept
    pub panicked: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.refreshed + self.unchanged + self.evicted + self.skipped + self.failed + self.panicked
    }

    fn record(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Refreshed => self.refreshed += 1,
            RefreshOutcome::Unchanged => self.unchanged += 1,
            RefreshOutcome::Evicted => self.evicted += 1,
            RefreshOutcome::Skipped => self.skipped += 1,
            RefreshOutcome::Failed => self.failed += 1,
        }
    }
}

/// Refreshes every cached configuration against the store
pub struct CacheRefresher {
    cache: Arc<ConfigurationCache>,
    source: Arc<ConfigurationSource>,
}

impl CacheRefresher {
    pub fn new(cache: Arc<ConfigurationCache>, source: Arc<ConfigurationSource>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &Arc<ConfigurationCache> {
        &self.cache
    }

    /// Refresh all keys resident at call time, one task per key.
    ///
    /// Waits for every task. A task that panics is counted and logged; it
    /// does not affect the others.
    pub async fn sweep(self: &Arc<Self>) -> SweepReport {
        let keys = self.cache.keys();
        self.sweep_keys(keys).await
    }

    /// Refresh a snapshot of keys. Keys no longer resident when their task
    /// runs are skipped.
    async fn sweep_keys(self: &Arc<Self>, keys: Vec<String>) -> SweepReport {
        let started = Instant::now();
        debug!("Starting refresh sweep of {} cached configuration(s)", keys.len());

        let tasks: Vec<(String, JoinHandle<RefreshOutcome>)> = keys
            .into_iter()
            .map(|key| {
                let refresher = Arc::clone(self);
                let task_key = key.clone();
                let handle = tokio::spawn(async move { refresher.refresh_key(&task_key).await });
                (key, handle)
            })
            .collect();

        let (keys, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let results = join_all(handles).await;

        let mut report = SweepReport::default();
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(e) if e.is_panic() => {
                    error!("Refresh task for {} panicked: {}", key, e);
                    report.panicked += 1;
                }
                Err(e) => {
                    warn!("Refresh task for {} was cancelled: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("appconfig_refresh_sweeps_total").increment(1);
        if report.failed + report.panicked > 0 {
            metrics::counter!("appconfig_refresh_failures_total")
                .increment((report.failed + report.panicked) as u64);
        }

        debug!(
            "Refresh sweep complete in {:?}: {} refreshed, {} unchanged, {} evicted, {} skipped, {} failed, {} panicked",
            started.elapsed(),
            report.refreshed,
            report.unchanged,
            report.evicted,
            report.skipped,
            report.failed,
            report.panicked
        );

        report
    }

    /// Conditionally re-fetch one cached configuration.
    ///
    /// Reads and writes leave the entry's recency alone, so sweeps do not
    /// reorder the cache. A key removed while its fetch is in flight stays
    /// removed.
    async fn refresh_key(&self, key: &str) -> RefreshOutcome {
        let key = key.to_string();
        let Some(entry) = self.cache.peek(&key) else {
            debug!("Skipping refresh of {}, no longer cached", key);
            return RefreshOutcome::Skipped;
        };

        match self.source.fetch(&key, entry.version.as_deref()).await {
            Ok(fetched) if fetched.is_empty() => {
                debug!("Configuration {} unchanged", key);
                RefreshOutcome::Unchanged
            }
            Ok(fetched) => {
                // Keep the known token when the store does not send one
                let version = fetched.version.or_else(|| entry.version.clone());

                if entry.content.as_ref() == Some(&fetched.content) {
                    debug!("Configuration {} fetched again with identical content", key);
                    if version != entry.version {
                        let updated = CachedConfiguration::new(
                            entry.content.clone(),
                            version,
                            EntryOrigin::Refresh,
                        );
                        if self.cache.replace(&key, updated).is_none() {
                            return RefreshOutcome::Skipped;
                        }
                    }
                    return RefreshOutcome::Unchanged;
                }

                let updated = CachedConfiguration::new(
                    Some(fetched.content),
                    version.clone(),
                    EntryOrigin::Refresh,
                );
                if self.cache.replace(&key, updated).is_none() {
                    debug!("Dropping refresh of {}, removed while fetching", key);
                    return RefreshOutcome::Skipped;
                }

                warn!("Configuration {} changed, new version: {:?}", key, version);
                RefreshOutcome::Refreshed
            }
            Err(CoreError::NotFound(message)) => {
                warn!(
                    "Configuration {} no longer exists, removing from cache: {}",
                    key, message
                );
                self.cache.delete(&key);
                metrics::counter!("appconfig_cache_evictions_total").increment(1);
                RefreshOutcome::Evicted
            }
            Err(e) => {
                warn!("Failed to refresh configuration {}: {}", key, e);
                RefreshOutcome::Failed
            }
        }
    }
}

/// Timer that runs refresh sweeps at a fixed interval
pub struct RefreshScheduler {
    refresher: Arc<CacheRefresher>,
    interval: watch::Sender<Duration>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Create a stopped scheduler
    pub fn new(refresher: Arc<CacheRefresher>, interval: Duration) -> Self {
        let (interval, _) = watch::channel(interval);
        Self {
            refresher,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn refresher(&self) -> &Arc<CacheRefresher> {
        &self.refresher
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the timer. The first sweep runs one interval from now.
    ///
    /// Returns false if the scheduler was already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        info!(
            "Starting background cache refresh (interval: {:?})",
            self.interval()
        );

        let refresher = Arc::clone(&self.refresher);
        let mut interval = self.interval.subscribe();

        *task = Some(tokio::spawn(async move {
            loop {
                let period = *interval.borrow_and_update();

                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        debug!("Running scheduled cache refresh");
                        refresher.sweep().await;
                    }
                    changed = interval.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        // Restart the wait with the new interval
                    }
                }
            }
        }));

        true
    }

    /// Stop the timer. Stopping a stopped scheduler is a no-op.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Stopped background cache refresh");
        }
    }

    /// Replace the interval, returning the previous one.
    ///
    /// Does not trigger a sweep; a running timer restarts its wait with the
    /// new interval.
    pub fn reset(&self, interval: Duration) -> Duration {
        let previous = self.interval.send_replace(interval);
        info!(
            "Reset cache refresh interval from {:?} to {:?}",
            previous, interval
        );
        previous
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
