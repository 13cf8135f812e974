use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::StoreConfig,
    error::StorageError,
    events::{Callback, EventBus, Subscription},
    lock, snapshot,
    storage::{probe, Storage},
    sweeper::Sweeper,
};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedEntry {
    #[serde(rename = "id")]
    pub project_id: i64,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "revealedAt")]
    pub revealed_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Revealed(i64),
    Expired(i64),
    Swept { removed: usize },
    Cleared,
}

/// Published on the store's bus after every change to the persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreEvent {
    /// Id of the store that made the change.
    pub origin: u64,
    pub change: Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub persistence_available: bool,
    pub storage_bytes: usize,
}

/// Tracks which projects were revealed recently.
///
/// Every method is infallible from the caller's point of view: storage
/// failures are logged and the store keeps working from memory.
pub struct RevealStore {
    shared: Arc<Shared>,
    subscription: Option<Subscription<StoreEvent>>,
    sweeper: Mutex<Option<Sweeper>>,
}

pub(crate) struct Shared {
    id: u64,
    entries: Mutex<Vec<RevealedEntry>>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    bus: EventBus<StoreEvent>,
    config: StoreConfig,
    persistent: bool,
}

impl RevealStore {
    pub fn new(storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        Self::with_parts(storage, config, Arc::new(SystemClock), EventBus::new())
    }

    /// Build a store on an explicit clock and bus. Stores sharing a backend
    /// and a bus pick up each other's changes.
    pub fn with_parts(
        storage: Arc<dyn Storage>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
        bus: EventBus<StoreEvent>,
    ) -> Self {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        let loaded = match probe(storage.as_ref()) {
            Ok(()) => load_initial(storage.as_ref(), &config, clock.now_millis()),
            Err(e) => {
                warn!(store = id, error = %e, "storage unavailable, reveals will not survive a restart");
                None
            }
        };
        let persistent = loaded.is_some();
        let entries = loaded.unwrap_or_default();
        debug!(store = id, entries = entries.len(), persistent, "reveal store ready");

        let shared = Arc::new(Shared {
            id,
            entries: Mutex::new(entries),
            storage,
            clock,
            bus,
            config,
            persistent,
        });

        let weak = Arc::downgrade(&shared);
        let subscription = shared.bus.subscribe(Arc::new(move |event: &StoreEvent| {
            if event.origin == id {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared.reload();
            }
        }));

        RevealStore {
            shared,
            subscription: Some(subscription),
            sweeper: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn bus(&self) -> &EventBus<StoreEvent> {
        &self.shared.bus
    }

    pub fn subscribe(&self, callback: Callback<StoreEvent>) -> Subscription<StoreEvent> {
        self.shared.bus.subscribe(callback)
    }

    /// Mark `project_id` as revealed now. Revealing an id that is still
    /// active leaves its timestamp alone.
    pub fn reveal(&self, project_id: i64) {
        let shared = &self.shared;
        let now = shared.clock.now_millis();
        {
            let mut entries = lock(&shared.entries);
            shared.refresh(&mut entries);
            match entries.iter().position(|e| e.project_id == project_id) {
                Some(i) if shared.is_active(&entries[i], now) => return,
                Some(i) => {
                    entries.remove(i);
                }
                None => {}
            }
            entries.push(RevealedEntry {
                project_id,
                revealed_at: now,
            });
            let excess = entries.len().saturating_sub(shared.config.max_items);
            if excess > 0 {
                entries.drain(..excess);
                debug!(store = shared.id, evicted = excess, "reveal limit reached, evicted oldest");
            }
            shared.persist(&entries);
        }
        shared.publish(Change::Revealed(project_id));
    }

    pub fn is_revealed(&self, project_id: i64) -> bool {
        let now = self.shared.clock.now_millis();
        self.shared
            .find(project_id)
            .is_some_and(|entry| self.shared.is_active(&entry, now))
    }

    /// True while any record of `project_id` exists, expired or not.
    pub fn is_permanently_revealed(&self, project_id: i64) -> bool {
        self.shared.find(project_id).is_some()
    }

    pub fn time_remaining(&self, project_id: i64) -> Duration {
        let Some(entry) = self.shared.find(project_id) else {
            return Duration::ZERO;
        };
        let now = self.shared.clock.now_millis();
        let lifetime = self.shared.lifetime_millis();
        let age = now.saturating_sub(entry.revealed_at);
        Duration::from_millis(lifetime.saturating_sub(age))
    }

    pub fn expire(&self, project_id: i64) {
        let shared = &self.shared;
        {
            let mut entries = lock(&shared.entries);
            shared.refresh(&mut entries);
            let before = entries.len();
            entries.retain(|e| e.project_id != project_id);
            if entries.len() == before {
                return;
            }
            shared.persist(&entries);
        }
        shared.publish(Change::Expired(project_id));
    }

    pub fn clear(&self) {
        let shared = &self.shared;
        {
            let mut entries = lock(&shared.entries);
            entries.clear();
            if shared.persistent {
                if let Err(e) = shared.storage.remove(&shared.config.data_key) {
                    warn!(store = shared.id, error = %e, "failed to clear persisted reveals");
                }
            }
        }
        shared.publish(Change::Cleared);
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Active ids, oldest reveal first.
    pub fn revealed_ids(&self) -> Vec<i64> {
        let now = self.shared.clock.now_millis();
        lock(&self.shared.entries)
            .iter()
            .filter(|e| self.shared.is_active(e, now))
            .map(|e| e.project_id)
            .collect()
    }

    /// Replace the in-memory entries with the persisted snapshot.
    pub fn reload(&self) {
        self.shared.reload();
    }

    pub fn stats(&self) -> StoreStats {
        let shared = &self.shared;
        let now = shared.clock.now_millis();
        let (total, active) = {
            let entries = lock(&shared.entries);
            let active = entries.iter().filter(|e| shared.is_active(e, now)).count();
            (entries.len(), active)
        };
        let storage_bytes = if shared.persistent {
            snapshot::persisted_size(shared.storage.as_ref(), &shared.config).unwrap_or_else(|e| {
                warn!(store = shared.id, error = %e, "failed to measure persisted reveals");
                0
            })
        } else {
            0
        };
        StoreStats {
            total,
            active,
            expired: total - active,
            persistence_available: shared.persistent,
            storage_bytes,
        }
    }

    /// Start the periodic sweep on the current tokio runtime. Calling it
    /// again while a sweeper runs does nothing.
    pub fn start_sweeper(&self) -> anyhow::Result<()> {
        let mut sweeper = lock(&self.sweeper);
        if sweeper.is_none() {
            *sweeper = Some(Sweeper::spawn(
                Arc::downgrade(&self.shared),
                self.shared.config.sweep_interval,
            )?);
        }
        Ok(())
    }

    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(&self) {
        let sweeper = lock(&self.sweeper).take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }

    #[cfg(test)]
    fn entries(&self) -> Vec<RevealedEntry> {
        lock(&self.shared.entries).clone()
    }
}

impl Drop for RevealStore {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Shared {
    fn lifetime_millis(&self) -> u64 {
        self.config.reveal_duration.as_millis() as u64
    }

    fn is_active(&self, entry: &RevealedEntry, now: u64) -> bool {
        is_active(entry, now, self.lifetime_millis())
    }

    fn find(&self, project_id: i64) -> Option<RevealedEntry> {
        lock(&self.entries)
            .iter()
            .find(|e| e.project_id == project_id)
            .copied()
    }

    fn persist(&self, entries: &[RevealedEntry]) {
        if !self.persistent {
            return;
        }
        if let Err(e) = snapshot::write_entries(self.storage.as_ref(), &self.config, entries) {
            warn!(store = self.id, error = %e, "failed to persist reveals");
        }
    }

    fn publish(&self, change: Change) {
        self.bus.notify(StoreEvent {
            origin: self.id,
            change,
        });
    }

    pub(crate) fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let removed = {
            let mut entries = lock(&self.entries);
            self.refresh(&mut entries);
            let before = entries.len();
            entries.retain(|e| self.is_active(e, now));
            let removed = before - entries.len();
            if removed > 0 {
                self.persist(&entries);
            }
            removed
        };
        if removed > 0 {
            debug!(store = self.id, removed, "swept expired reveals");
            self.publish(Change::Swept { removed });
        }
        removed
    }

    fn reload(&self) {
        self.refresh(&mut lock(&self.entries));
    }

    /// Pull the persisted snapshot into `entries` so a mutation applies on
    /// top of what other stores on the same backend wrote. Call with the
    /// entries lock held.
    fn refresh(&self, entries: &mut Vec<RevealedEntry>) {
        if !self.persistent {
            return;
        }
        match snapshot::read_entries(self.storage.as_ref(), &self.config) {
            Ok(loaded) => *entries = dedupe(loaded),
            Err(e) => {
                warn!(store = self.id, error = %e, "failed to reload reveals, keeping memory");
            }
        }
    }
}

fn is_active(entry: &RevealedEntry, now: u64, lifetime: u64) -> bool {
    now.saturating_sub(entry.revealed_at) < lifetime
}

/// Keep the last record of each id, preserving order.
fn dedupe(entries: Vec<RevealedEntry>) -> Vec<RevealedEntry> {
    let mut seen = HashSet::new();
    let mut kept: Vec<RevealedEntry> = entries
        .into_iter()
        .rev()
        .filter(|e| seen.insert(e.project_id))
        .collect();
    kept.reverse();
    kept
}

/// Reconcile the persisted snapshot at startup. `None` means the backend
/// could not be trusted and the store should stay in memory.
fn load_initial(storage: &dyn Storage, config: &StoreConfig, now: u64) -> Option<Vec<RevealedEntry>> {
    match snapshot::check_version(storage, config) {
        Ok(()) => {}
        Err(StorageError::VersionMismatch { found, expected }) => {
            info!(?found, %expected, "reveal schema changed, discarding persisted reveals");
            if let Err(e) = snapshot::reset(storage, config) {
                warn!(error = %e, "failed to reset persisted reveals, keeping reveals in memory");
                return None;
            }
            return Some(Vec::new());
        }
        Err(e) => {
            warn!(error = %e, "failed to read reveal schema version, keeping reveals in memory");
            return None;
        }
    }

    let loaded = match snapshot::read_entries(storage, config) {
        Ok(loaded) => loaded,
        Err(e @ StorageError::Corrupted(_)) => {
            warn!(error = %e, "discarding corrupted persisted reveals");
            if let Err(e) = storage.remove(&config.data_key) {
                warn!(error = %e, "failed to remove corrupted reveals");
            }
            return Some(Vec::new());
        }
        Err(e) => {
            warn!(error = %e, "failed to read persisted reveals, keeping reveals in memory");
            return None;
        }
    };

    let loaded_len = loaded.len();
    let lifetime = config.reveal_duration.as_millis() as u64;
    let mut entries = dedupe(loaded);
    entries.retain(|e| is_active(e, now, lifetime));
    let excess = entries.len().saturating_sub(config.max_items);
    entries.drain(..excess);
    if entries.len() != loaded_len {
        debug!(dropped = loaded_len - entries.len(), "cleaned persisted reveals on load");
        if let Err(e) = snapshot::write_entries(storage, config, &entries) {
            warn!(error = %e, "failed to persist cleaned reveals");
        }
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::{dedupe, Change, RevealStore, RevealedEntry, StoreEvent};
    use crate::{
        clock::ManualClock,
        config::StoreConfig,
        error::StorageResult,
        events::EventBus,
        snapshot,
        storage::{MemoryStorage, Storage},
    };

    const T0: u64 = 1_700_000_000_000;

    fn store_on(storage: &MemoryStorage, clock: &ManualClock, config: StoreConfig) -> RevealStore {
        RevealStore::with_parts(
            Arc::new(storage.clone()),
            config,
            Arc::new(clock.clone()),
            EventBus::new(),
        )
    }

    #[test]
    fn reveal_does_not_refresh_active_entry() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, StoreConfig::default());

        store.reveal(5);
        clock.advance(Duration::from_secs(10));
        store.reveal(5);
        store.reveal(5);

        assert_eq!(
            store.entries(),
            vec![RevealedEntry {
                project_id: 5,
                revealed_at: T0
            }]
        );
        assert_eq!(store.time_remaining(5), Duration::from_secs(50));
    }

    #[test]
    fn revealing_expired_entry_moves_it_to_the_back() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, StoreConfig::default());

        store.reveal(1);
        store.reveal(2);
        clock.advance(Duration::from_secs(61));
        store.reveal(1);

        let ids: Vec<i64> = store.entries().iter().map(|e| e.project_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(store.is_revealed(1));
        assert!(!store.is_revealed(2));
        assert!(store.is_permanently_revealed(2));
    }

    #[test]
    fn expire_of_unknown_id_publishes_nothing() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, StoreConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = store.subscribe(Arc::new(move |event: &StoreEvent| {
            sink.lock().unwrap().push(event.change)
        }));

        store.expire(99);
        store.reveal(3);
        store.expire(3);

        assert_eq!(
            *events.lock().unwrap(),
            vec![Change::Revealed(3), Change::Expired(3)]
        );
    }

    #[test]
    fn stats_count_expired_entries_until_swept() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, StoreConfig::default());

        store.reveal(1);
        clock.advance(Duration::from_secs(45));
        store.reveal(2);
        clock.advance(Duration::from_secs(20));

        let stats = store.stats();
        assert_eq!((stats.total, stats.active, stats.expired), (2, 1, 1));
        assert!(stats.persistence_available);
        let config = StoreConfig::default();
        let expected_bytes = storage.get(&config.data_key).unwrap().unwrap().len()
            + config.schema_version.len();
        assert_eq!(stats.storage_bytes, expected_bytes);

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.sweep(), 0);
        let stats = store.stats();
        assert_eq!((stats.total, stats.active, stats.expired), (1, 1, 0));
    }

    #[test]
    fn load_drops_expired_and_rewrites() {
        let storage = MemoryStorage::new();
        let config = StoreConfig::default();
        storage.set(&config.version_key, &config.schema_version).unwrap();
        let persisted = [
            RevealedEntry {
                project_id: 1,
                revealed_at: T0 - 120_000,
            },
            RevealedEntry {
                project_id: 2,
                revealed_at: T0 - 1_000,
            },
        ];
        snapshot::write_entries(&storage, &config, &persisted).unwrap();

        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, config.clone());

        assert!(!store.is_permanently_revealed(1));
        assert!(store.is_revealed(2));
        assert_eq!(
            snapshot::read_entries(&storage, &config).unwrap(),
            vec![persisted[1]]
        );
    }

    #[test]
    fn corrupted_snapshot_is_discarded() {
        let storage = MemoryStorage::new();
        let config = StoreConfig::default();
        storage.set(&config.version_key, &config.schema_version).unwrap();
        storage.set(&config.data_key, "[{\"id\": 1,").unwrap();

        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, config.clone());

        assert_eq!(store.stats().total, 0);
        assert_eq!(storage.get(&config.data_key).unwrap(), None);
        store.reveal(1);
        assert!(store.is_revealed(1));
    }

    #[test]
    fn memory_only_when_storage_disabled() {
        let storage = MemoryStorage::disabled();
        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, StoreConfig::default());

        store.reveal(11);
        assert!(store.is_revealed(11));
        let stats = store.stats();
        assert!(!stats.persistence_available);
        assert_eq!(stats.storage_bytes, 0);

        // Storage coming back later does not switch persistence on.
        storage.set_available(true);
        store.reveal(12);
        assert_eq!(storage.get("revealed-projects").unwrap(), None);
    }

    #[test]
    fn write_failure_keeps_memory_state() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let store = store_on(&storage, &clock, StoreConfig::default());

        storage.set_available(false);
        store.reveal(8);
        assert!(store.is_revealed(8));
        assert_eq!(storage.get("revealed-projects").unwrap_err().to_string(), "storage backend is unavailable");
    }

    /// Backend whose version tag cannot be read.
    struct UnreadableVersion(MemoryStorage);

    impl Storage for UnreadableVersion {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            if key == "revealed-projects-version" {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into());
            }
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.0.remove(key)
        }
    }

    #[test]
    fn unreadable_version_falls_back_to_memory() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let store = RevealStore::with_parts(
            Arc::new(UnreadableVersion(storage.clone())),
            StoreConfig::default(),
            Arc::new(clock.clone()),
            EventBus::new(),
        );

        assert!(!store.stats().persistence_available);
        store.reveal(4);
        assert!(store.is_revealed(4));
        // Nothing was written without a version tag.
        assert_eq!(storage.get("revealed-projects").unwrap(), None);
        assert_eq!(storage.get("revealed-projects-version").unwrap(), None);
    }

    #[test]
    fn dedupe_keeps_last_record() {
        let entries = vec![
            RevealedEntry {
                project_id: 1,
                revealed_at: 1,
            },
            RevealedEntry {
                project_id: 2,
                revealed_at: 2,
            },
            RevealedEntry {
                project_id: 1,
                revealed_at: 3,
            },
        ];
        let kept = dedupe(entries);
        assert_eq!(
            kept,
            vec![
                RevealedEntry {
                    project_id: 2,
                    revealed_at: 2
                },
                RevealedEntry {
                    project_id: 1,
                    revealed_at: 3
                },
            ]
        );
    }
}
