//! Background polling cache for backend query results.
//!
//! Consumers register queries and read the last cached result without
//! touching the network. One worker thread per cache refreshes every entry on
//! a fixed interval, issuing a single fetch per distinct query fingerprint,
//! and raises the [`ChangeSignal`] when the observable content moved.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::change_signal::ChangeSignal;
use crate::config::CacheConfig;
use crate::query::{Fingerprint, Query, Record};
use crate::source::{self, CredentialProvider, FetchSkip};

/// Handle for a registered query. Never reused within one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

#[cfg(test)]
impl EntryId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("unknown cache entry {0}")]
    NotFound(EntryId),
}

struct CacheEntry {
    query: Query,
    fingerprint: Fingerprint,
    last_result: Arc<Vec<Record>>,
    /// Time of the last successful fetch
    refreshed_at: Option<DateTime<Utc>>,
}

struct Registry {
    entries: BTreeMap<EntryId, CacheEntry>,
    next_id: u64,
    /// Snapshot hash as of the last commit
    snapshot: Fingerprint,
}

impl Registry {
    fn new() -> Self {
        let mut reg = Self {
            entries: BTreeMap::new(),
            next_id: 1,
            snapshot: Fingerprint([0u8; 32]),
        };
        reg.snapshot = reg.snapshot_hash();
        reg
    }

    fn snapshot_hash(&self) -> Fingerprint {
        let mut builder = Fingerprint::builder(b"SNAPSHOT");
        for (id, entry) in &self.entries {
            let encoded = serde_json::to_vec(entry.last_result.as_ref()).unwrap_or_default();
            builder.part(&id.0.to_le_bytes()).part(&encoded);
        }
        builder.finish()
    }

    /// Recompute the snapshot hash. Returns true if it differs from the last commit.
    fn commit_snapshot(&mut self) -> bool {
        let hash = self.snapshot_hash();
        let changed = hash != self.snapshot;
        self.snapshot = hash;
        changed
    }

    /// One representative query per distinct fingerprint.
    fn groups(&self) -> BTreeMap<Fingerprint, Query> {
        let mut groups = BTreeMap::new();
        for entry in self.entries.values() {
            groups
                .entry(entry.fingerprint)
                .or_insert_with(|| entry.query.clone());
        }
        groups
    }

    /// Propagate one fetched result to every entry sharing the fingerprint.
    fn store(&mut self, fingerprint: Fingerprint, records: &Arc<Vec<Record>>, at: DateTime<Utc>) {
        for entry in self.entries.values_mut() {
            if entry.fingerprint == fingerprint {
                entry.last_result = records.clone();
                entry.refreshed_at = Some(at);
            }
        }
    }
}

/// Lock-free counters for observability.
#[derive(Default)]
pub(crate) struct CacheMetrics {
    cycles: AtomicU64,
    skipped_cycles: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    changes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub changes: u64,
}

impl CacheMetrics {
    fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// No session, nothing was fetched
    pub skipped: bool,
    pub fetched: usize,
    pub failed: usize,
    pub changed: bool,
}

/// Cooperative stop flag the worker sleeps on.
struct StopFlag {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopFlag {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn set(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    fn reset(&self) {
        *self.stopped.lock() = false;
    }

    /// Sleep for `interval`, re-checking the flag at least every `granularity`.
    /// Returns true if stop was requested.
    /// An interval past the clock's range sleeps until stopped.
    fn wait(&self, interval: Duration, granularity: Duration) -> bool {
        let deadline = Instant::now().checked_add(interval);
        let mut stopped = self.stopped.lock();
        while !*stopped {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(granularity)
                }
                None => granularity,
            };
            self.wake.wait_for(&mut stopped, slice);
        }
        true
    }
}

struct Inner {
    registry: Mutex<Registry>,
    provider: Arc<dyn CredentialProvider>,
    signal: Arc<ChangeSignal>,
    config: CacheConfig,
    stop: StopFlag,
    metrics: CacheMetrics,
}

impl Inner {
    fn raise(&self) {
        self.signal.raise();
    }

    fn run(&self) {
        tracing::info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "query cache poll loop started"
        );
        loop {
            self.poll_once();
            if self
                .stop
                .wait(self.config.poll_interval, self.config.cancel_granularity)
            {
                break;
            }
        }
        tracing::info!("query cache poll loop stopped");
    }

    fn poll_once(&self) -> CycleReport {
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        let conn = match source::connect(self.provider.as_ref()) {
            Ok(s) => s,
            Err(FetchSkip::NoSession) => {
                self.metrics.skipped_cycles.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("no session, skipping poll cycle");
                return CycleReport {
                    skipped: true,
                    ..CycleReport::default()
                };
            }
            Err(FetchSkip::Connect(e)) => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(category = e.classify(), error = %e, "could not open backend connection");
                return CycleReport {
                    failed: 1,
                    ..CycleReport::default()
                };
            }
        };

        // Fetch without holding the registry lock; entries registered or
        // removed meanwhile are reconciled in `store`.
        let groups = self.registry.lock().groups();
        let mut report = CycleReport::default();
        let mut fetched = Vec::with_capacity(groups.len());
        for (fingerprint, query) in groups {
            self.metrics.fetches.fetch_add(1, Ordering::Relaxed);
            match source::run_query(conn.as_ref(), &query) {
                Ok(records) => fetched.push((fingerprint, Arc::new(records))),
                Err(e) => {
                    report.failed += 1;
                    self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        %fingerprint,
                        entity_type = %query.entity_type,
                        category = e.classify(),
                        error = %e,
                        "fetch failed, keeping stale result"
                    );
                }
            }
        }
        report.fetched = fetched.len();

        report.changed = {
            let mut reg = self.registry.lock();
            let now = Utc::now();
            for (fingerprint, records) in &fetched {
                reg.store(*fingerprint, records, now);
            }
            reg.commit_snapshot()
        };

        if report.changed {
            self.metrics.changes.fetch_add(1, Ordering::Relaxed);
            self.raise();
        }
        tracing::debug!(
            fetched = report.fetched,
            failed = report.failed,
            changed = report.changed,
            "poll cycle done"
        );
        report
    }

    /// Fetch one entry's query inline and store the result on it and its
    /// siblings. Failures are logged; the stale result stays.
    fn refresh_entry(&self, id: EntryId) -> Result<bool, CacheError> {
        let (query, fingerprint) = {
            let reg = self.registry.lock();
            let entry = reg.entries.get(&id).ok_or(CacheError::NotFound(id))?;
            (entry.query.clone(), entry.fingerprint)
        };

        let conn = match source::connect(self.provider.as_ref()) {
            Ok(s) => s,
            Err(FetchSkip::NoSession) => {
                tracing::debug!(entry_id = %id, "no session, serving cached result");
                return Ok(false);
            }
            Err(FetchSkip::Connect(e)) => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(entry_id = %id, category = e.classify(), error = %e, "could not open backend connection");
                return Ok(false);
            }
        };

        self.metrics.fetches.fetch_add(1, Ordering::Relaxed);
        let records = match source::run_query(conn.as_ref(), &query) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(entry_id = %id, category = e.classify(), error = %e, "inline fetch failed");
                return Ok(false);
            }
        };

        let mut reg = self.registry.lock();
        reg.store(fingerprint, &records, Utc::now());
        Ok(reg.commit_snapshot())
    }
}

pub struct QueryCache {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueryCache {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        signal: Arc<ChangeSignal>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::new()),
                provider,
                signal,
                config: config.normalized(),
                stop: StopFlag::new(),
                metrics: CacheMetrics::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn signal(&self) -> &Arc<ChangeSignal> {
        &self.inner.signal
    }

    /// Register a query. With `eager_fetch` and a live session the query runs
    /// before this returns; otherwise the entry starts from whatever an
    /// equivalent entry already holds (or empty) and fills on the next cycle.
    pub fn register(&self, query: Query, eager_fetch: bool) -> EntryId {
        let fingerprint = query.fingerprint();
        let id = {
            let mut reg = self.inner.registry.lock();
            let id = EntryId(reg.next_id);
            reg.next_id += 1;
            let seed = reg
                .entries
                .values()
                .find(|e| e.fingerprint == fingerprint)
                .map(|e| (e.last_result.clone(), e.refreshed_at));
            let (last_result, refreshed_at) = seed.unwrap_or_default();
            reg.entries.insert(
                id,
                CacheEntry {
                    query,
                    fingerprint,
                    last_result,
                    refreshed_at,
                },
            );
            reg.commit_snapshot();
            id
        };
        tracing::debug!(entry_id = %id, %fingerprint, eager_fetch, "registered query");

        if eager_fetch {
            // `id` was inserted above, so NotFound is impossible here
            let _ = self.inner.refresh_entry(id);
        }
        self.inner.raise();
        id
    }

    /// Remove an entry. Returns false if the id is unknown.
    pub fn unregister(&self, id: EntryId) -> bool {
        let removed = {
            let mut reg = self.inner.registry.lock();
            let removed = reg.entries.remove(&id).is_some();
            if removed {
                reg.commit_snapshot();
            }
            removed
        };
        if removed {
            tracing::debug!(entry_id = %id, "unregistered query");
            self.inner.raise();
        }
        removed
    }

    /// Last cached result. With `force_sync` the query runs inline first,
    /// bypassing the poll interval.
    pub fn get(&self, id: EntryId, force_sync: bool) -> Result<Arc<Vec<Record>>, CacheError> {
        if force_sync && self.inner.refresh_entry(id)? {
            self.inner.metrics.changes.fetch_add(1, Ordering::Relaxed);
            self.inner.raise();
        }
        self.inner
            .registry
            .lock()
            .entries
            .get(&id)
            .map(|e| e.last_result.clone())
            .ok_or(CacheError::NotFound(id))
    }

    pub fn clear(&self) {
        {
            let mut reg = self.inner.registry.lock();
            reg.entries.clear();
            reg.commit_snapshot();
        }
        self.inner.raise();
    }

    /// Run one poll cycle on the calling thread.
    pub fn poll_once(&self) -> CycleReport {
        self.inner.poll_once()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.inner.registry.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.inner.registry.lock().entries.keys().copied().collect()
    }

    pub fn refreshed_at(&self, id: EntryId) -> Option<DateTime<Utc>> {
        self.inner
            .registry
            .lock()
            .entries
            .get(&id)
            .and_then(|e| e.refreshed_at)
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn metrics_json(&self) -> serde_json::Value {
        serde_json::to_value(self.metrics()).unwrap_or(serde_json::Value::Null)
    }

    /// Spawn the poll thread. No-op (returns false) if one is already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return false;
        }
        self.inner.stop.reset();
        let inner = self.inner.clone();
        match std::thread::Builder::new()
            .name("trackmenu-poll".into())
            .spawn(move || inner.run())
        {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn poll thread");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stop the poll thread and wait for it to exit.
    pub fn shutdown(&self) {
        // Stop is raised under the worker lock so a concurrent `start` either
        // sees the old worker or resets the flag after this one is gone.
        let handle = {
            let mut worker = self.worker.lock();
            let Some(handle) = worker.take() else {
                return;
            };
            self.inner.stop.set();
            handle
        };
        if handle.join().is_err() {
            tracing::error!("poll thread panicked");
        }
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fakes::{FakeBackend, FakeProvider, record};
    use serde_json::json;

    fn shots() -> Query {
        Query::new("Shot")
            .filter("project.Project.id", "is", 12)
            .fields(["code", "id"])
    }

    fn cache_for(provider: Arc<FakeProvider>, config: CacheConfig) -> QueryCache {
        QueryCache::new(provider, Arc::new(ChangeSignal::new()), config)
    }

    fn fast() -> CacheConfig {
        CacheConfig {
            poll_interval: Duration::from_secs(60),
            cancel_granularity: Duration::from_millis(100),
        }
    }

    fn ack(cache: &QueryCache) {
        if let Some(p) = cache.signal().pending() {
            cache.signal().acknowledge(p);
        }
    }

    #[test]
    fn equivalent_queries_share_one_fetch_per_cycle() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());

        let a = cache.register(shots(), false);
        let b = cache.register(
            Query::new("Shot")
                .fields(["id", "code"])
                .filter("project.Project.id", "is", 12),
            false,
        );
        assert_ne!(a, b);

        let report = cache.poll_once();
        assert_eq!(report.fetched, 1);
        assert_eq!(backend.calls_for("Shot"), 1);
        assert_eq!(cache.get(a, false).unwrap(), cache.get(b, false).unwrap());
        assert_eq!(cache.get(a, false).unwrap()[0]["code"], "sh010");

        cache.poll_once();
        assert_eq!(backend.calls_for("Shot"), 2);
    }

    #[test]
    fn distinct_queries_fetch_separately() {
        let backend = Arc::new(FakeBackend::default());
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        cache.register(shots(), false);
        cache.register(Query::new("Asset"), false);
        let report = cache.poll_once();
        assert_eq!(report.fetched, 2);
        assert_eq!(backend.calls_for("Shot"), 1);
        assert_eq!(backend.calls_for("Asset"), 1);
    }

    #[test]
    fn unregister_removes_and_signals() {
        let cache = cache_for(FakeProvider::signed_in(Arc::new(FakeBackend::default())), fast());
        let id = cache.register(shots(), false);
        ack(&cache);

        assert!(cache.unregister(id));
        assert!(cache.signal().is_raised());
        assert_eq!(cache.get(id, false), Err(CacheError::NotFound(id)));
        assert_eq!(cache.get(id, true), Err(CacheError::NotFound(id)));
    }

    #[test]
    fn unregister_unknown_id_returns_false() {
        let cache = cache_for(FakeProvider::signed_in(Arc::new(FakeBackend::default())), fast());
        let id = cache.register(shots(), false);
        cache.unregister(id);
        ack(&cache);
        assert!(!cache.unregister(id));
        assert!(!cache.signal().is_raised());
    }

    #[test]
    fn identical_results_do_not_signal() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        cache.register(shots(), false);
        ack(&cache);

        assert!(cache.poll_once().changed);
        assert!(cache.signal().is_raised());
        ack(&cache);

        assert!(!cache.poll_once().changed);
        assert!(!cache.signal().is_raised());

        backend.set("Shot", vec![record(1, "sh010"), record(2, "sh020")]);
        let before = cache.signal().raise_count();
        assert!(cache.poll_once().changed);
        assert_eq!(cache.signal().raise_count(), before + 1);
    }

    #[test]
    fn failed_fetch_keeps_stale_result_and_other_groups_update() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        backend.set("Asset", vec![record(7, "hero")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        let shot_id = cache.register(shots(), false);
        let asset_id = cache.register(Query::new("Asset"), false);
        cache.poll_once();

        backend.fail("Shot");
        backend.set("Asset", vec![record(7, "hero"), record(8, "villain")]);
        let report = cache.poll_once();

        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(cache.get(shot_id, false).unwrap()[0]["code"], "sh010");
        assert_eq!(cache.get(asset_id, false).unwrap().len(), 2);
        assert_eq!(cache.metrics().fetch_failures, 1);
    }

    #[test]
    fn no_session_makes_cycle_a_noop() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_out(backend.clone()), fast());
        let id = cache.register(shots(), true);

        let report = cache.poll_once();
        assert!(report.skipped);
        assert_eq!(backend.calls.lock().len(), 0);
        assert!(cache.get(id, false).unwrap().is_empty());
        assert_eq!(cache.metrics().skipped_cycles, 1);
    }

    #[test]
    fn eager_register_fetches_before_returning() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        let id = cache.register(shots(), true);
        assert_eq!(cache.get(id, false).unwrap().len(), 1);
        assert!(cache.refreshed_at(id).is_some());
    }

    #[test]
    fn lazy_register_seeds_from_equivalent_entry() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        cache.register(shots(), true);
        let second = cache.register(shots(), false);
        assert_eq!(cache.get(second, false).unwrap().len(), 1);
        assert_eq!(backend.calls_for("Shot"), 1);
    }

    #[test]
    fn force_sync_bypasses_interval_and_updates_siblings() {
        let backend = Arc::new(FakeBackend::default());
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        let a = cache.register(shots(), false);
        let b = cache.register(shots(), false);
        ack(&cache);

        backend.set("Shot", vec![record(3, "sh030")]);
        assert!(cache.get(a, false).unwrap().is_empty());
        let fresh = cache.get(a, true).unwrap();
        assert_eq!(fresh[0]["id"], json!(3));
        assert_eq!(cache.get(b, false).unwrap(), fresh);
        assert!(cache.signal().is_raised());
    }

    #[test]
    fn force_sync_failure_serves_stale() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        let id = cache.register(shots(), true);
        backend.fail("Shot");
        assert_eq!(cache.get(id, true).unwrap()[0]["code"], "sh010");
    }

    #[test]
    fn clear_drops_entries_and_signals_but_ids_stay_unique() {
        let cache = cache_for(FakeProvider::signed_in(Arc::new(FakeBackend::default())), fast());
        let first = cache.register(shots(), false);
        ack(&cache);
        cache.clear();
        assert!(cache.signal().is_raised());
        assert!(cache.is_empty());
        let second = cache.register(shots(), false);
        assert_ne!(first, second);
        assert_eq!(cache.ids(), vec![second]);
    }

    #[test]
    fn start_is_idempotent_and_runs_a_cycle_immediately() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        let id = cache.register(shots(), false);

        assert!(cache.start());
        assert!(!cache.start());
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.get(id, false).unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cache.get(id, false).unwrap().len(), 1);
        cache.shutdown();
        assert!(!cache.is_running());
    }

    #[test]
    fn shutdown_is_bounded_by_granularity_not_interval() {
        let cache = cache_for(FakeProvider::signed_out(Arc::new(FakeBackend::default())), fast());
        assert!(cache.start());
        std::thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        cache.shutdown();
        assert!(started.elapsed() <= Duration::from_millis(150));
        assert!(!cache.is_running());
    }

    #[test]
    fn stop_flag_wait_expires_without_stop() {
        let flag = StopFlag::new();
        let started = Instant::now();
        assert!(!flag.wait(Duration::from_millis(40), Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn cache_can_restart_after_shutdown() {
        let cache = cache_for(FakeProvider::signed_out(Arc::new(FakeBackend::default())), fast());
        assert!(cache.start());
        cache.shutdown();
        assert!(cache.start());
        cache.shutdown();
        assert!(cache.metrics().cycles >= 2);
    }

    #[test]
    fn unreachable_backend_counts_one_failure_and_keeps_results() {
        let backend = Arc::new(FakeBackend::default());
        backend.set("Shot", vec![record(1, "sh010")]);
        let cache = cache_for(FakeProvider::signed_in(backend.clone()), fast());
        let id = cache.register(shots(), true);
        ack(&cache);

        *backend.unreachable.lock() = true;
        backend.set("Shot", vec![record(2, "sh020")]);
        let report = cache.poll_once();
        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 0);
        assert!(!report.changed);
        assert!(!cache.signal().is_raised());
        assert_eq!(cache.get(id, true).unwrap()[0]["code"], "sh010");
        assert!(!cache.signal().is_raised());
        assert_eq!(cache.metrics().fetch_failures, 2);
        assert_eq!(backend.calls_for("Shot"), 1);
    }

    #[test]
    fn stop_flag_wait_with_unrepresentable_deadline_still_stops() {
        let flag = Arc::new(StopFlag::new());
        let waiter = {
            let flag = flag.clone();
            std::thread::spawn(move || flag.wait(Duration::MAX, Duration::from_millis(10)))
        };
        std::thread::sleep(Duration::from_millis(30));
        flag.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn huge_interval_keeps_worker_alive_until_shutdown() {
        let cache = cache_for(
            FakeProvider::signed_out(Arc::new(FakeBackend::default())),
            CacheConfig {
                poll_interval: Duration::MAX,
                cancel_granularity: Duration::from_millis(10),
            },
        );
        assert!(cache.start());
        std::thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        cache.shutdown();
        assert!(started.elapsed() <= Duration::from_millis(150));
        assert_eq!(cache.metrics().cycles, 1);
    }

    #[test]
    fn zero_interval_does_not_spin() {
        let backend = Arc::new(FakeBackend::default());
        let cache = cache_for(
            FakeProvider::signed_in(backend.clone()),
            CacheConfig {
                poll_interval: Duration::ZERO,
                cancel_granularity: Duration::from_millis(10),
            },
        );
        cache.register(shots(), false);
        assert!(cache.start());
        std::thread::sleep(Duration::from_millis(100));
        cache.shutdown();
        assert_eq!(cache.metrics().cycles, 1);
        assert_eq!(backend.calls_for("Shot"), 1);
    }

    #[test]
    fn start_after_shutdown_runs_a_live_worker() {
        let backend = Arc::new(FakeBackend::default());
        let cache = Arc::new(cache_for(FakeProvider::signed_in(backend.clone()), fast()));
        cache.register(shots(), false);
        for _ in 0..20 {
            let stopper = {
                let cache = cache.clone();
                std::thread::spawn(move || cache.shutdown())
            };
            cache.start();
            stopper.join().unwrap();
        }
        cache.shutdown();
        assert!(!cache.is_running());

        let before = cache.metrics().cycles;
        assert!(cache.start());
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.metrics().cycles == before && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(cache.is_running());
        assert!(cache.metrics().cycles > before);
        cache.shutdown();
    }

    #[test]
    fn metrics_json_has_all_counters() {
        let cache = cache_for(FakeProvider::signed_in(Arc::new(FakeBackend::default())), fast());
        cache.register(shots(), false);
        cache.poll_once();
        let json = cache.metrics_json();
        assert_eq!(json["cycles"], 1);
        assert_eq!(json["fetches"], 1);
        assert_eq!(json["fetch_failures"], 0);
        assert!(json.get("skipped_cycles").is_some());
        assert!(json.get("changes").is_some());
    }
}
