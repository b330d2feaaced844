//! In-memory TTL cache with least-recently-used eviction
//!
//! One [`CacheStore`] per named cache. Expired entries are removed lazily on
//! `get`/`has` and by a periodic sweep; capacity is enforced on insert by
//! evicting the entry with the oldest access time.

use super::config::{CacheConfig, CacheSettings};
use super::logging::EventLogger;
use crate::clock::{SharedClock, elapsed_between, system_clock};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often the background sweep scans for expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Fixed per-entry overhead used by the memory estimate
const ENTRY_OVERHEAD: usize = 64;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: DateTime<Utc>,
    ttl: Duration,
    access_count: u64,
    last_accessed: DateTime<Utc>,
    /// Tie-breaker for entries accessed at the same instant
    access_seq: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.created_at, now) > self.ttl
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    hits: u64,
    misses: u64,
    next_seq: u64,
}

impl<T> CacheInner<T> {
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub name: String,
    pub total_items: usize,
    /// Percentage of lookups that hit
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Rough size estimate, not an exact byte count
    pub approximate_memory_usage: usize,
}

/// Access count for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub key: String,
    pub access_count: u64,
}

/// Portable form of one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEntry<T> {
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub access_count: u64,
}

/// Portable snapshot of a cache's live entries
pub type CacheSnapshot<T> = HashMap<String, ExportedEntry<T>>;

/// Bounded key/value store with per-entry TTL
#[derive(Clone)]
pub struct CacheStore<T> {
    inner: Arc<Mutex<CacheInner<T>>>,
    config: CacheConfig,
    clock: SharedClock,
    logger: EventLogger,
}

impl<T> fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("len", &self.lock().entries.len())
            .finish()
    }
}

impl<T: Clone + Serialize> CacheStore<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, system_clock(), EventLogger::default())
    }

    pub fn with_clock(config: CacheConfig, clock: SharedClock, logger: EventLogger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                next_seq: 0,
            })),
            config,
            logger: logger.with_clock(clock.clone()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or overwrite `key`, using the default TTL when `ttl` is `None`.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// accessed entry. A zero-capacity cache stores nothing.
    pub fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }

        let now = self.clock.now();
        let mut inner = self.lock();

        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.config.max_size {
                match Self::least_recently_used(&inner.entries) {
                    Some(victim) => {
                        inner.entries.remove(&victim);
                        self.logger.log_cache_eviction(&self.config.name, &victim);
                    }
                    None => break,
                }
            }
        }

        let access_seq = inner.next_seq();
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                access_count: 0,
                last_accessed: now,
                access_seq,
            },
        );
    }

    /// Look up `key`, counting a hit or a miss. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.entries.remove(key);
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        let access_seq = inner.next_seq();
        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        entry.access_seq = access_seq;
        Some(entry.value.clone())
    }

    /// Whether a live entry exists. Does not touch counters or access metadata.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                inner.entries.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove every entry and reset hit/miss counters
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let removed = inner.purge_expired(now);

        self.logger
            .log_cache_sweep(&self.config.name, removed, inner.entries.len());
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64 * 100.0
        };
        let miss_rate = if lookups == 0 { 0.0 } else { 100.0 - hit_rate };

        let approximate_memory_usage = inner
            .entries
            .iter()
            .map(|(key, entry)| Self::estimate_entry_size(key, &entry.value))
            .sum();

        CacheStats {
            name: self.config.name.clone(),
            total_items: inner.entries.len(),
            hit_rate,
            miss_rate,
            total_hits: inner.hits,
            total_misses: inner.misses,
            approximate_memory_usage,
        }
    }

    /// Up to `limit` keys with the highest access counts, most used first
    pub fn most_used(&self, limit: usize) -> Vec<KeyUsage> {
        let inner = self.lock();
        let mut usage: Vec<KeyUsage> = inner
            .entries
            .iter()
            .map(|(key, entry)| KeyUsage {
                key: key.clone(),
                access_count: entry.access_count,
            })
            .collect();

        usage.sort_by(|a, b| b.access_count.cmp(&a.access_count).then_with(|| a.key.cmp(&b.key)));
        usage.truncate(limit);
        usage
    }

    /// Snapshot every non-expired entry
    pub fn export(&self) -> CacheSnapshot<T> {
        let now = self.clock.now();
        let inner = self.lock();

        inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| {
                (
                    key.clone(),
                    ExportedEntry {
                        value: entry.value.clone(),
                        created_at: entry.created_at,
                        ttl_ms: entry.ttl.as_millis() as u64,
                        access_count: entry.access_count,
                    },
                )
            })
            .collect()
    }

    /// Restore entries from a snapshot, skipping any already expired.
    ///
    /// Imported entries keep their creation time, TTL and access count; their
    /// last access becomes now. Returns how many entries were imported.
    pub fn import(&self, snapshot: CacheSnapshot<T>) -> usize {
        if self.config.max_size == 0 {
            return 0;
        }

        let now = self.clock.now();
        let mut inner = self.lock();
        let mut imported = 0;

        // Oldest first so the newest entries survive if capacity runs out
        let mut entries: Vec<(String, ExportedEntry<T>)> = snapshot.into_iter().collect();
        entries.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(&b.0)));

        for (key, exported) in entries {
            let entry = CacheEntry {
                value: exported.value,
                created_at: exported.created_at,
                ttl: Duration::from_millis(exported.ttl_ms),
                access_count: exported.access_count,
                last_accessed: now,
                access_seq: 0,
            };
            if entry.is_expired(now) {
                continue;
            }

            if !inner.entries.contains_key(&key) {
                while inner.entries.len() >= self.config.max_size {
                    match Self::least_recently_used(&inner.entries) {
                        Some(victim) => {
                            inner.entries.remove(&victim);
                            self.logger.log_cache_eviction(&self.config.name, &victim);
                        }
                        None => break,
                    }
                }
            }

            let access_seq = inner.next_seq();
            inner.entries.insert(key, CacheEntry { access_seq, ..entry });
            imported += 1;
        }

        imported
    }

    fn least_recently_used(entries: &HashMap<String, CacheEntry<T>>) -> Option<String> {
        entries
            .iter()
            .min_by(|a, b| {
                a.1.last_accessed
                    .cmp(&b.1.last_accessed)
                    .then_with(|| a.1.access_seq.cmp(&b.1.access_seq))
            })
            .map(|(key, _)| key.clone())
    }

    fn estimate_entry_size(key: &str, value: &T) -> usize {
        let value_units = serde_json::to_string(value)
            .map(|json| json.encode_utf16().count())
            .unwrap_or(0);
        (key.encode_utf16().count() + value_units) * 2 + ENTRY_OVERHEAD
    }
}

impl<T> CacheStore<T> {
    fn lock(&self) -> MutexGuard<'_, CacheInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Serialize + DeserializeOwned> CacheStore<T> {
    /// Restore from a JSON snapshot produced by [`CacheStore::export_json`]
    pub fn import_json(&self, json: &str) -> anyhow::Result<usize> {
        let snapshot: CacheSnapshot<T> = serde_json::from_str(json)?;
        Ok(self.import(snapshot))
    }

    pub fn export_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.export())?)
    }
}

impl<T: Send + 'static> CacheStore<T> {
    /// Spawn the periodic expiry sweep on the current tokio runtime.
    ///
    /// The task only holds a weak reference and ends on the first tick after
    /// the last clone of the cache is dropped.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.start_sweeper_every(SWEEP_INTERVAL)
    }

    pub(crate) fn start_sweeper_every(&self, every: Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.inner);
        let clock = self.clock.clone();
        let logger = self.logger.clone();
        let name = self.config.name.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let mut inner = entries.lock().unwrap_or_else(PoisonError::into_inner);
                let removed = inner.purge_expired(clock.now());
                logger.log_cache_sweep(&name, removed, inner.entries.len());
            }
        })
    }
}

/// The application's three named caches
#[derive(Debug, Clone)]
pub struct CacheRegistry {
    /// Chat completions keyed by model and prompt
    pub api: CacheStore<String>,
    /// Numerology results
    pub calculations: CacheStore<serde_json::Value>,
    /// Short-lived UI values
    pub ui: CacheStore<serde_json::Value>,
    sweepers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CacheRegistry {
    pub fn new(settings: &CacheSettings) -> Self {
        Self::with_clock(settings, system_clock(), EventLogger::default())
    }

    pub fn with_clock(settings: &CacheSettings, clock: SharedClock, logger: EventLogger) -> Self {
        Self {
            api: CacheStore::with_clock(settings.api_responses.clone(), clock.clone(), logger.clone()),
            calculations: CacheStore::with_clock(settings.calculations.clone(), clock.clone(), logger.clone()),
            ui: CacheStore::with_clock(settings.ui_state.clone(), clock, logger),
            sweepers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start the expiry sweep for every cache, replacing any running sweeps
    pub fn start_sweepers(&self) {
        let mut sweepers = self.sweepers.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in sweepers.drain(..) {
            handle.abort();
        }
        sweepers.extend([
            self.api.start_sweeper(),
            self.calculations.start_sweeper(),
            self.ui.start_sweeper(),
        ]);
    }

    /// Abort the running sweeps, returning how many were stopped
    pub fn stop_sweepers(&self) -> usize {
        let mut sweepers = self.sweepers.lock().unwrap_or_else(PoisonError::into_inner);
        let stopped = sweepers.len();
        for handle in sweepers.drain(..) {
            handle.abort();
        }
        stopped
    }

    pub fn clear_all(&self) {
        self.api.clear();
        self.calculations.clear();
        self.ui.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.api.purge_expired() + self.calculations.purge_expired() + self.ui.purge_expired()
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        vec![self.api.stats(), self.calculations.stats(), self.ui.stats()]
    }
}
