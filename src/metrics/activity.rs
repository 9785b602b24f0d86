//! TTL-based activity tracking for metric series.
//!
//! Sinks that keep one in-memory object per series record every observation
//! here. A background sweep expires series that have not been observed for
//! longer than the TTL and hands them back through the eviction callback, so
//! series of crashed or silently removed instances do not accumulate forever.

use super::types::{Labels, MetricId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Called once for every expired series, while the cache lock is held.
///
/// An observation of the same series made concurrently with the sweep waits
/// until the callback has returned, so the callback never undoes it. The
/// callback must not call back into the cache.
pub type EvictionCallback = Arc<dyn Fn(&MetricId) + Send + Sync>;

#[derive(Debug, Clone)]
struct ActivityRecord {
    id: MetricId,
    last_seen: Instant,
}

type Records = Arc<Mutex<FxHashMap<u64, ActivityRecord>>>;

/// Tracks last-seen time per series and expires stale ones.
pub struct MetricsActivityCache {
    records: Records,
    callback: EvictionCallback,
    ttl: Duration,
    stop: Arc<Notify>,
    sweeper: Option<JoinHandle<()>>,
}

impl MetricsActivityCache {
    /// Create a cache and start its background sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(ttl: Duration, sweep_interval: Duration, callback: EvictionCallback) -> Self {
        let mut cache = Self::without_sweeper(ttl, callback);
        cache.start_sweeper(sweep_interval);
        cache
    }

    /// Create a cache with no background sweep; expiry only runs through
    /// [`MetricsActivityCache::expire_stale`].
    pub fn without_sweeper(ttl: Duration, callback: EvictionCallback) -> Self {
        Self {
            records: Arc::new(Mutex::new(FxHashMap::default())),
            callback,
            ttl,
            stop: Arc::new(Notify::new()),
            sweeper: None,
        }
    }

    fn start_sweeper(&mut self, sweep_interval: Duration) {
        let records = Arc::clone(&self.records);
        let callback = Arc::clone(&self.callback);
        let stop = Arc::clone(&self.stop);
        let ttl = self.ttl;

        self.sweeper = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + sweep_interval, sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let expired = sweep(&records, ttl, &callback);
                        if expired > 0 {
                            tracing::debug!("Expired {} inactive metric series", expired);
                        }
                    }
                    _ = stop.notified() => {
                        tracing::debug!("Metric activity sweep stopped");
                        return;
                    }
                }
            }
        }));
    }

    /// Record an observation of `(name, labels)` at the current time.
    pub fn seen_metric(&self, name: &str, labels: &Labels) {
        self.seen(MetricId::new(name, labels.clone()));
    }

    /// Record an observation of `id` at the current time.
    pub fn seen(&self, id: MetricId) {
        let key = id.fingerprint();
        let now = Instant::now();
        self.records.lock().insert(key, ActivityRecord { id, last_seen: now });
    }

    /// Run one sweep now. Returns the number of expired series.
    pub fn expire_stale(&self) -> usize {
        sweep(&self.records, self.ttl, &self.callback)
    }

    /// Forget a series without invoking the callback.
    pub fn forget(&self, id: &MetricId) {
        self.records.lock().remove(&id.fingerprint());
    }

    pub fn contains(&self, id: &MetricId) -> bool {
        self.records.lock().contains_key(&id.fingerprint())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Halt the background sweep. Observations are still recorded afterwards
    /// but nothing expires them unless `expire_stale` is called.
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

impl Drop for MetricsActivityCache {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

/// Remove every record older than `now - ttl` and invoke the callback for it.
///
/// The cutoff is computed once per pass. Check-and-remove and the callback
/// both happen under the lock, so a record refreshed during the pass is never
/// removed by it and a refresh racing the callback lands after it.
fn sweep(records: &Records, ttl: Duration, callback: &EvictionCallback) -> usize {
    let now = Instant::now();
    let Some(cutoff) = now.checked_sub(ttl) else {
        return 0;
    };

    let mut records = records.lock();
    let stale: Vec<u64> = records
        .iter()
        .filter(|(_, record)| record.last_seen < cutoff)
        .map(|(key, _)| *key)
        .collect();

    let mut expired = 0;
    for key in stale {
        if let Some(record) = records.remove(&key) {
            callback(&record.id);
            expired += 1;
        }
    }
    expired
}
