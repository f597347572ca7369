//! Persistence gateway: durable DuckDB store with an in-process fallback.
//!
//! The durable path is retried on every call. A failed replace parks the
//! records in the [`FallbackCache`]; reads of that kind are served from the
//! cache until a later replace reaches the store, and from the cache as
//! well whenever the store cannot be read.

use super::Repository;
use crate::error::StorageError;
use crate::models::{AssessmentStats, RecordKind, RecordSet};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ── Store seam ────────────────────────────────────────────────────────────────

pub trait RecordStore: Send + Sync {
    /// Delete every stored record of `records.kind()` and insert `records`.
    fn replace_all(&self, records: &RecordSet) -> Result<usize, StorageError>;

    fn read_all(&self, kind: RecordKind) -> Result<RecordSet, StorageError>;

    fn assessment_stats(&self) -> Result<AssessmentStats, StorageError>;

    fn begin_run(&self, kind: RecordKind) -> Result<i64, StorageError>;

    fn finish_run(
        &self,
        run_id: i64,
        pages: u32,
        records: usize,
        persisted: bool,
        error: Option<&str>,
    ) -> Result<(), StorageError>;
}

// ── DuckDB ────────────────────────────────────────────────────────────────────

/// Opens the database on first use. After any failure the connection is
/// dropped so the next call reconnects.
pub struct DuckDbStore {
    path: Option<PathBuf>,
    run_migrations: bool,
    conn: Mutex<Option<Repository>>,
}

impl DuckDbStore {
    pub fn new(path: impl Into<PathBuf>, run_migrations: bool) -> Self {
        Self {
            path: Some(path.into()),
            run_migrations,
            conn: Mutex::new(None),
        }
    }

    /// Private in-memory database, kept for the lifetime of the store.
    pub fn in_memory() -> Result<Self, StorageError> {
        let repo = Repository::open_in_memory()?;
        repo.run_migrations()?;
        Ok(Self {
            path: None,
            run_migrations: false,
            conn: Mutex::new(Some(repo)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Repository>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_repo<T>(
        &self,
        f: impl FnOnce(&Repository) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.lock();

        if guard.is_none() {
            let Some(path) = &self.path else {
                return Err(StorageError::Unavailable("in-memory database is gone".into()));
            };
            debug!("Opening DuckDB at {:?}", path);
            let repo = Repository::open(path)?;
            if self.run_migrations {
                repo.run_migrations()?;
            }
            *guard = Some(repo);
        }

        let Some(repo) = guard.as_ref() else {
            return Err(StorageError::Unavailable("no connection".into()));
        };
        let result = f(repo);

        if result.is_err() && self.path.is_some() {
            *guard = None;
        }
        result
    }
}

impl RecordStore for DuckDbStore {
    fn replace_all(&self, records: &RecordSet) -> Result<usize, StorageError> {
        self.with_repo(|repo| repo.replace_all(records))
    }

    fn read_all(&self, kind: RecordKind) -> Result<RecordSet, StorageError> {
        self.with_repo(|repo| repo.read_all(kind))
    }

    fn assessment_stats(&self) -> Result<AssessmentStats, StorageError> {
        self.with_repo(Repository::assessment_stats)
    }

    fn begin_run(&self, kind: RecordKind) -> Result<i64, StorageError> {
        self.with_repo(|repo| repo.begin_scrape_run(kind))
    }

    fn finish_run(
        &self,
        run_id: i64,
        pages: u32,
        records: usize,
        persisted: bool,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with_repo(|repo| repo.finish_scrape_run(run_id, pages, records, persisted, error))
    }
}

// ── Fallback cache ────────────────────────────────────────────────────────────

/// Process-lifetime record sets keyed by kind. Not durable and not shared
/// between processes. An entry is pending: it is newer than whatever the
/// durable store holds for its kind, until [`FallbackCache::discard`] is
/// called after a successful durable write or [`FallbackCache::clear`].
#[derive(Default)]
pub struct FallbackCache {
    sets: Mutex<HashMap<RecordKind, RecordSet>>,
}

impl FallbackCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RecordKind, RecordSet>> {
        self.sets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put(&self, records: RecordSet) {
        self.lock().insert(records.kind(), records);
    }

    /// The parked set for `kind`, if its durable write is still outstanding.
    pub fn pending(&self, kind: RecordKind) -> Option<RecordSet> {
        self.lock().get(&kind).cloned()
    }

    pub fn discard(&self, kind: RecordKind) {
        self.lock().remove(&kind);
    }

    /// The cached set for `kind`, or an empty set.
    pub fn get(&self, kind: RecordKind) -> RecordSet {
        self.lock()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| RecordSet::empty(kind))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    pub persisted: bool,
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn RecordStore>,
    cache: Arc<FallbackCache>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<FallbackCache>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn replace_all(&self, records: &RecordSet) -> PersistOutcome {
        match self.store.replace_all(records) {
            Ok(n) => {
                info!("Persisted {} {} records", n, records.kind());
                self.cache.discard(records.kind());
                PersistOutcome { persisted: true }
            }
            Err(e) => {
                warn!(
                    "Durable write of {} {} records failed ({}); keeping them in memory",
                    records.len(),
                    records.kind(),
                    e
                );
                self.cache.put(records.clone());
                PersistOutcome { persisted: false }
            }
        }
    }

    /// Stored records of `kind` and whether they came from the durable store.
    pub fn read_all(&self, kind: RecordKind) -> (RecordSet, bool) {
        if let Some(parked) = self.cache.pending(kind) {
            debug!("Serving {} {} records awaiting a durable write", parked.len(), kind);
            return (parked, false);
        }
        match self.store.read_all(kind) {
            Ok(records) => (records, true),
            Err(e) => {
                warn!("Durable read of {} failed ({}); serving fallback cache", kind, e);
                (self.cache.get(kind), false)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
