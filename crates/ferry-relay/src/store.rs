//! Identity store using RocksDB.
//!
//! The [`IdentityStore`] maps source item ids to the destination identity
//! they were published as, and remembers which items have been fully
//! processed. It is the only place where cross-item relationships
//! (a quote chain's predecessors) are resolved, so every write is synced
//! before the engine moves on.
//!
//! # Key Design
//!
//! | Prefix           | Value                                   |
//! |------------------|-----------------------------------------|
//! | `m/{source_id}`  | JSON [`DestinationRef`] (legacy: bare id) |
//! | `p/{source_id}`  | empty, item fully processed             |
//! | `a/{source_id}`  | unix seconds an uncommitted publish began |
//! | `meta/first_run` | empty, first non-empty cycle completed  |
//!
//! Mappings are never overwritten: the first successful write for a source
//! id wins.

use crate::error::{Error, Result};
use ferry_core::DestinationRef;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteBatch, WriteOptions};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const MAPPING_PREFIX: &[u8] = b"m/";
const PROCESSED_PREFIX: &[u8] = b"p/";
const ATTEMPT_PREFIX: &[u8] = b"a/";
const FIRST_RUN_KEY: &[u8] = b"meta/first_run";

fn key(prefix: &[u8], source_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + source_id.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(source_id.as_bytes());
    key
}

fn sync_write_opts() -> WriteOptions {
    let mut opts = WriteOptions::default();
    opts.set_sync(true);
    opts
}

fn count_prefix(db: &DBWithThreadMode<MultiThreaded>, prefix: &[u8]) -> Result<u64> {
    let mut count = 0u64;
    for entry in db.prefix_iterator(prefix) {
        let (k, _) = entry?;
        if !k.starts_with(prefix) {
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// A publish that was started but never committed or abandoned.
///
/// Left behind when the process dies between the destination call and the
/// mapping write; the destination may or may not hold the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttempt {
    /// Source id of the item being published.
    pub source_id: String,
    /// Unix seconds when the attempt began.
    pub started_at: i64,
}

/// RocksDB-backed source-to-destination identity store.
///
/// Thread-safe: can be shared across tasks via `Arc<IdentityStore>`.
pub struct IdentityStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Mapping count, scanned once at open and maintained by `put`/`forget`.
    mappings: AtomicU64,
}

impl IdentityStore {
    /// Open or create an identity store at the given path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ferry_relay::IdentityStore;
    ///
    /// let store = IdentityStore::open("./data/identity")?;
    /// # Ok::<(), ferry_relay::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening identity store at {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.increase_parallelism(num_cpus::get().min(4) as i32);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;
        let mappings = count_prefix(&db, MAPPING_PREFIX)?;
        info!(mappings, "Identity store opened");

        Ok(Self {
            db: Arc::new(db),
            mappings: AtomicU64::new(mappings),
        })
    }

    /// Look up the destination identity of a source item.
    pub fn get(&self, source_id: &str) -> Result<Option<DestinationRef>> {
        match self.db.get(key(MAPPING_PREFIX, source_id))? {
            Some(value) => decode_mapping(source_id, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Persist a mapping. Also clears any attempt record for the item, in the
    /// same synced batch.
    ///
    /// Returns `false` without writing if a mapping already exists. A repeat
    /// write of an identical mapping is a no-op that returns `true`.
    pub fn put(&self, source_id: &str, destination: &DestinationRef) -> Result<bool> {
        if destination.id.is_empty() {
            return Err(Error::Store(format!(
                "refusing empty destination id for {source_id}"
            )));
        }

        if let Some(existing) = self.get(source_id)? {
            if &existing == destination {
                return Ok(true);
            }
            warn!(
                source_id,
                existing = %existing,
                attempted = %destination,
                "Mapping already exists; keeping the first write"
            );
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put(key(MAPPING_PREFIX, source_id), serde_json::to_vec(destination)?);
        batch.delete(key(ATTEMPT_PREFIX, source_id));
        self.db.write_opt(batch, &sync_write_opts())?;
        self.mappings.fetch_add(1, Ordering::Relaxed);

        debug!(source_id, destination = %destination, "Stored mapping");
        Ok(true)
    }

    /// Whether the item has been fully processed (relayed or filtered).
    pub fn has_processed(&self, source_id: &str) -> Result<bool> {
        Ok(self.db.get(key(PROCESSED_PREFIX, source_id))?.is_some())
    }

    /// Mark an item as fully processed.
    pub fn mark_processed(&self, source_id: &str) -> Result<()> {
        self.db
            .put_opt(key(PROCESSED_PREFIX, source_id), b"", &sync_write_opts())?;
        Ok(())
    }

    /// Remove every trace of a source item so it will be relayed again.
    ///
    /// Returns `true` if anything was removed.
    pub fn forget(&self, source_id: &str) -> Result<bool> {
        let mapped = self.get(source_id)?.is_some();
        let known = mapped
            || self.has_processed(source_id)?
            || self.db.get(key(ATTEMPT_PREFIX, source_id))?.is_some();

        let mut batch = WriteBatch::default();
        batch.delete(key(MAPPING_PREFIX, source_id));
        batch.delete(key(PROCESSED_PREFIX, source_id));
        batch.delete(key(ATTEMPT_PREFIX, source_id));
        self.db.write_opt(batch, &sync_write_opts())?;
        if mapped {
            self.mappings.fetch_sub(1, Ordering::Relaxed);
        }

        if known {
            info!(source_id, "Forgot relayed item");
        }
        Ok(known)
    }

    // =========================================================================
    // Attempt log
    // =========================================================================

    /// Record that a destination publish for this item is about to start.
    pub fn begin_attempt(&self, source_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.db.put_opt(
            key(ATTEMPT_PREFIX, source_id),
            now.to_string().as_bytes(),
            &sync_write_opts(),
        )?;
        Ok(())
    }

    /// Clear an attempt that ended without a mapping.
    pub fn abandon_attempt(&self, source_id: &str) -> Result<()> {
        self.db
            .delete_opt(key(ATTEMPT_PREFIX, source_id), &sync_write_opts())?;
        Ok(())
    }

    /// Attempts that were never committed or abandoned.
    pub fn unresolved_attempts(&self) -> Result<Vec<PendingAttempt>> {
        let mut attempts = Vec::new();
        for entry in self.db.prefix_iterator(ATTEMPT_PREFIX) {
            let (k, v) = entry?;
            let Some(id) = k.strip_prefix(ATTEMPT_PREFIX) else {
                break;
            };
            let source_id = String::from_utf8_lossy(id).into_owned();
            let started_at = std::str::from_utf8(&v)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            attempts.push(PendingAttempt {
                source_id,
                started_at,
            });
        }
        Ok(attempts)
    }

    // =========================================================================
    // First run
    // =========================================================================

    /// Whether the first non-empty cycle has completed.
    pub fn first_run_completed(&self) -> Result<bool> {
        Ok(self.db.get(FIRST_RUN_KEY)?.is_some())
    }

    /// Record that the first non-empty cycle has completed.
    pub fn mark_first_run_completed(&self) -> Result<()> {
        self.db.put_opt(FIRST_RUN_KEY, b"", &sync_write_opts())?;
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Number of stored mappings. Does not touch the database.
    pub fn mapping_count(&self) -> u64 {
        self.mappings.load(Ordering::Relaxed)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> IdentityStats {
        IdentityStats {
            mappings: self.mapping_count(),
            pending_attempts: self
                .unresolved_attempts()
                .map(|a| a.len() as u64)
                .unwrap_or(0),
        }
    }
}

fn decode_mapping(source_id: &str, value: &[u8]) -> Result<DestinationRef> {
    if let Ok(destination) = serde_json::from_slice::<DestinationRef>(value) {
        return Ok(destination);
    }

    // Legacy: bare destination id, always a post.
    match std::str::from_utf8(value) {
        Ok(id) if !id.trim().is_empty() => Ok(DestinationRef::post(id.trim())),
        _ => Err(Error::Store(format!(
            "corrupt mapping value for {source_id}"
        ))),
    }
}

/// Statistics about the identity store.
#[derive(Debug, Clone, Default)]
pub struct IdentityStats {
    /// Number of stored mappings.
    pub mappings: u64,
    /// Number of uncommitted publish attempts.
    pub pending_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, IdentityStore) {
        let tmp = TempDir::new().unwrap();
        let store = IdentityStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_open_and_close() {
        let tmp = TempDir::new().unwrap();
        let _store = IdentityStore::open(tmp.path()).unwrap();
    }

    #[test]
    fn test_put_and_get() {
        let (_tmp, store) = open_store();

        assert_eq!(store.get("t1").unwrap(), None);
        assert!(store.put("t1", &DestinationRef::post("dyn_1")).unwrap());
        assert_eq!(store.get("t1").unwrap(), Some(DestinationRef::post("dyn_1")));
    }

    #[test]
    fn test_first_write_wins() {
        let (_tmp, store) = open_store();

        assert!(store.put("t1", &DestinationRef::post("dyn_1")).unwrap());
        // Identical repeat is fine
        assert!(store.put("t1", &DestinationRef::post("dyn_1")).unwrap());
        // Conflicting write is refused
        assert!(!store.put("t1", &DestinationRef::video("BV2")).unwrap());
        assert_eq!(store.get("t1").unwrap(), Some(DestinationRef::post("dyn_1")));
    }

    #[test]
    fn test_put_rejects_empty_destination() {
        let (_tmp, store) = open_store();
        assert!(store.put("t1", &DestinationRef::post("")).is_err());
        assert_eq!(store.get("t1").unwrap(), None);
    }

    #[test]
    fn test_legacy_bare_value_reads_as_post() {
        let (_tmp, store) = open_store();
        store.db.put(key(MAPPING_PREFIX, "old"), b"987654").unwrap();
        assert_eq!(store.get("old").unwrap(), Some(DestinationRef::post("987654")));
    }

    #[test]
    fn test_processed_markers() {
        let (_tmp, store) = open_store();

        assert!(!store.has_processed("t1").unwrap());
        store.mark_processed("t1").unwrap();
        assert!(store.has_processed("t1").unwrap());
        // Processed is independent from mappings
        assert_eq!(store.get("t1").unwrap(), None);
    }

    #[test]
    fn test_forget() {
        let (_tmp, store) = open_store();

        store.put("t1", &DestinationRef::post("dyn_1")).unwrap();
        store.mark_processed("t1").unwrap();

        assert!(store.forget("t1").unwrap());
        assert_eq!(store.get("t1").unwrap(), None);
        assert!(!store.has_processed("t1").unwrap());

        // Nothing left to forget
        assert!(!store.forget("t1").unwrap());
    }

    #[test]
    fn test_attempt_cleared_by_put() {
        let (_tmp, store) = open_store();

        store.begin_attempt("t1").unwrap();
        store.begin_attempt("t2").unwrap();
        assert_eq!(store.unresolved_attempts().unwrap().len(), 2);

        store.put("t1", &DestinationRef::post("dyn_1")).unwrap();
        store.abandon_attempt("t2").unwrap();
        assert!(store.unresolved_attempts().unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_attempts_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = IdentityStore::open(tmp.path()).unwrap();
            store.begin_attempt("t9").unwrap();
        }

        let store = IdentityStore::open(tmp.path()).unwrap();
        let attempts = store.unresolved_attempts().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].source_id, "t9");
        assert!(attempts[0].started_at > 0);
    }

    #[test]
    fn test_prefix_scans_do_not_leak() {
        let (_tmp, store) = open_store();

        store.begin_attempt("a1").unwrap();
        store.mark_first_run_completed().unwrap();
        store.put("x", &DestinationRef::post("1")).unwrap();
        store.mark_processed("x").unwrap();

        assert_eq!(store.unresolved_attempts().unwrap().len(), 1);
        assert_eq!(store.mapping_count(), 1);
    }

    #[test]
    fn test_first_run_marker() {
        let (_tmp, store) = open_store();

        assert!(!store.first_run_completed().unwrap());
        store.mark_first_run_completed().unwrap();
        assert!(store.first_run_completed().unwrap());
    }

    #[test]
    fn test_mappings_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = IdentityStore::open(tmp.path()).unwrap();
            store.put("t1", &DestinationRef::video("BV1")).unwrap();
            store.flush().unwrap();
        }

        let store = IdentityStore::open(tmp.path()).unwrap();
        assert_eq!(store.get("t1").unwrap(), Some(DestinationRef::video("BV1")));
        assert_eq!(store.stats().mappings, 1);
    }

    #[test]
    fn test_mapping_count_tracks_put_and_forget() {
        let tmp = TempDir::new().unwrap();
        {
            let store = IdentityStore::open(tmp.path()).unwrap();
            store.put("a", &DestinationRef::post("1")).unwrap();
            store.put("b", &DestinationRef::post("2")).unwrap();
            // Identical repeat and conflicting write do not count.
            store.put("a", &DestinationRef::post("1")).unwrap();
            store.put("b", &DestinationRef::post("9")).unwrap();
            assert_eq!(store.mapping_count(), 2);

            store.mark_processed("c").unwrap();
            store.forget("c").unwrap();
            assert_eq!(store.mapping_count(), 2);
            store.forget("a").unwrap();
            assert_eq!(store.mapping_count(), 1);
        }

        let store = IdentityStore::open(tmp.path()).unwrap();
        assert_eq!(store.mapping_count(), 1);
    }
}
