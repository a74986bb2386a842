// ============================================================================
// WRITE-AHEAD LOG BACKEND
// ============================================================================
// Durable column store: every mutation is appended to a log before it is
// applied to an in-memory store. The log is periodically folded into a
// snapshot and truncated.
// - Record framing: [len: u32 LE][xxh3: u64 LE][bincode WalEntry]
// - Recovery: snapshot first, then log replay up to the first bad record
// - A torn or corrupt tail is cut off and logged, never replayed
// ============================================================================

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::memory::MemoryStore;
use super::{
    Column, ColumnFamilyDef, ColumnStore, KeyRange, KeySlice, MutationBatch, SliceRange,
    SuperColumn,
};
use crate::error::{StorageError, StorageResult};

const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FILE: &str = "snapshot.bin";
const SNAPSHOT_TMP_FILE: &str = "snapshot.tmp";

/// Length prefix plus checksum
const RECORD_HEADER_LEN: usize = 4 + 8;

pub const DEFAULT_SNAPSHOT_EVERY: u64 = 10_000;

// ----------------------------------------------------------------------------
// WAL Entry Types
// ----------------------------------------------------------------------------

/// One logged store operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum WalEntry {
    CreateFamily(ColumnFamilyDef),
    Batch(MutationBatch),
    Remove {
        family: String,
        key: String,
        timestamp: i64,
    },
    Truncate {
        family: String,
    },
}

fn encode_record(entry: &WalEntry) -> StorageResult<BytesMut> {
    let payload = bincode::serialize(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::invalid_request("write-ahead log record too large"))?;
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + payload.len());
    buf.put_u32_le(len);
    buf.put_u64_le(xxh3_64(&payload));
    buf.put_slice(&payload);
    Ok(buf)
}

/// Decode records from the front of `data`. Returns the entries and the
/// byte length of the intact prefix.
fn decode_records(data: &[u8]) -> (Vec<WalEntry>, usize) {
    let mut entries = Vec::new();
    let mut cursor = data;
    let mut good = 0usize;

    while cursor.remaining() >= RECORD_HEADER_LEN {
        let mut header = &cursor[..RECORD_HEADER_LEN];
        let len = header.get_u32_le() as usize;
        let checksum = header.get_u64_le();
        let body = &cursor[RECORD_HEADER_LEN..];
        if body.len() < len {
            break;
        }
        let payload = &body[..len];
        if xxh3_64(payload) != checksum {
            break;
        }
        match bincode::deserialize::<WalEntry>(payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        cursor.advance(RECORD_HEADER_LEN + len);
        good += RECORD_HEADER_LEN + len;
    }
    (entries, good)
}

// ----------------------------------------------------------------------------
// Sync Mode
// ----------------------------------------------------------------------------

/// WAL synchronization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncMode {
    /// No explicit sync (OS buffered)
    None,
    /// Sync after every write
    EveryWrite,
    /// Sync after N writes
    Batched { batch_size: usize },
}

impl Default for WalSyncMode {
    fn default() -> Self {
        WalSyncMode::Batched { batch_size: 100 }
    }
}

#[derive(Debug, Default)]
struct WalStats {
    entries_written: AtomicU64,
    bytes_written: AtomicU64,
    syncs_performed: AtomicU64,
    snapshots_taken: AtomicU64,
    entries_recovered: AtomicU64,
}

/// WAL statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalStatsSnapshot {
    pub entries_written: u64,
    pub bytes_written: u64,
    pub syncs_performed: u64,
    pub snapshots_taken: u64,
    pub entries_recovered: u64,
}

struct LogWriter {
    file: Option<File>,
    /// Log length up to the end of the last complete record
    len: u64,
    unsynced: usize,
    since_snapshot: u64,
}

impl LogWriter {
    /// Cut the log back to the last complete record. A handle that can not
    /// be cut is dropped so the next reconnect reopens and cuts the log.
    fn rollback(&mut self) {
        let Some(file) = self.file.as_ref() else {
            return;
        };
        if let Err(e) = file.set_len(self.len) {
            warn!(target: "sdnstats::wal", error = %e, len = self.len, "Failed to cut back write-ahead log");
            self.file = None;
        }
    }
}

// ----------------------------------------------------------------------------
// WalStore
// ----------------------------------------------------------------------------

/// Column store persisted through a write-ahead log.
pub struct WalStore {
    dir: PathBuf,
    memory: MemoryStore,
    writer: Mutex<LogWriter>,
    sync_mode: WalSyncMode,
    snapshot_every: u64,
    stats: WalStats,
}

impl std::fmt::Debug for WalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalStore")
            .field("dir", &self.dir)
            .field("sync_mode", &self.sync_mode)
            .field("snapshot_every", &self.snapshot_every)
            .finish()
    }
}

impl WalStore {
    /// Open (or create) a store in `dir` and recover its contents.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self {
            memory: MemoryStore::new(),
            writer: Mutex::new(LogWriter {
                file: None,
                len: 0,
                unsynced: 0,
                since_snapshot: 0,
            }),
            sync_mode: WalSyncMode::default(),
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            stats: WalStats::default(),
            dir,
        };
        store.recover()?;
        Ok(store)
    }

    /// Set the sync mode.
    pub fn with_sync_mode(mut self, mode: WalSyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Fold the log into a snapshot every `records` appends; 0 disables.
    pub fn with_snapshot_every(mut self, records: u64) -> Self {
        self.snapshot_every = records;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn wal_path(&self) -> PathBuf {
        self.dir.join(WAL_FILE)
    }

    fn open_log(&self) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.wal_path())?)
    }

    fn recover(&self) -> StorageResult<()> {
        let snapshot_path = self.dir.join(SNAPSHOT_FILE);
        if snapshot_path.exists() {
            let data = fs::read(&snapshot_path)?;
            if data.len() < 8 {
                return Err(StorageError::DataCorruption {
                    message: format!("snapshot {} is truncated", snapshot_path.display()),
                });
            }
            let mut header = &data[..8];
            let checksum = header.get_u64_le();
            let body = &data[8..];
            if xxh3_64(body) != checksum {
                return Err(StorageError::DataCorruption {
                    message: format!("snapshot {} failed its checksum", snapshot_path.display()),
                });
            }
            self.memory.import(body)?;
        }

        let wal_path = self.wal_path();
        let data = if wal_path.exists() {
            fs::read(&wal_path)?
        } else {
            Vec::new()
        };
        let (entries, good) = decode_records(&data);
        if good < data.len() {
            warn!(
                target: "sdnstats::wal",
                discarded_bytes = data.len() - good,
                "Discarding torn or corrupt write-ahead log tail"
            );
            let file = OpenOptions::new().write(true).open(&wal_path)?;
            file.set_len(good as u64)?;
            file.sync_all()?;
        }

        let recovered = entries.len() as u64;
        for entry in entries {
            if let Err(e) = self.replay(&entry) {
                warn!(target: "sdnstats::wal", error = %e, "Skipping unreplayable log record");
            }
        }

        let mut writer = self.writer.lock();
        writer.file = Some(self.open_log()?);
        writer.len = good as u64;
        writer.since_snapshot = recovered;
        self.stats.entries_recovered.store(recovered, AtomicOrdering::Relaxed);

        info!(
            target: "sdnstats::wal",
            dir = %self.dir.display(),
            records = recovered,
            "Recovered write-ahead log"
        );
        Ok(())
    }

    fn replay(&self, entry: &WalEntry) -> StorageResult<()> {
        match entry {
            WalEntry::CreateFamily(def) => self.memory.create_column_family(def),
            WalEntry::Batch(batch) => self.memory.batch_mutate(batch),
            WalEntry::Remove {
                family,
                key,
                timestamp,
            } => self.memory.remove(family, key, *timestamp),
            WalEntry::Truncate { family } => self.memory.truncate(family),
        }
    }

    /// Append a record and apply it while holding the log lock. Memory is
    /// left untouched when the append fails.
    fn log_and_apply(
        &self,
        entry: WalEntry,
        apply: impl FnOnce(&MemoryStore) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let record = encode_record(&entry)?;
        let mut writer = self.writer.lock();
        let sync_now = match self.sync_mode {
            WalSyncMode::None => false,
            WalSyncMode::EveryWrite => true,
            WalSyncMode::Batched { batch_size } => writer.unsynced + 1 >= batch_size.max(1),
        };

        // A record is only counted once it is fully written (and synced
        // when due); anything less is cut back off the log.
        let file = writer
            .file
            .as_mut()
            .ok_or_else(|| StorageError::transport("write-ahead log is not open"))?;
        if let Err(e) = file.write_all(&record) {
            writer.rollback();
            return Err(e.into());
        }
        if sync_now {
            if let Err(e) = file.sync_data() {
                writer.rollback();
                return Err(e.into());
            }
            writer.unsynced = 0;
            self.stats.syncs_performed.fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            writer.unsynced += 1;
        }
        writer.len += record.len() as u64;
        self.stats.entries_written.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats
            .bytes_written
            .fetch_add(record.len() as u64, AtomicOrdering::Relaxed);

        apply(&self.memory)?;

        writer.since_snapshot += 1;
        if self.snapshot_every > 0 && writer.since_snapshot >= self.snapshot_every {
            self.write_snapshot(&mut writer)?;
        }
        Ok(())
    }

    fn write_snapshot(&self, writer: &mut LogWriter) -> StorageResult<()> {
        let body = self.memory.export()?;
        let mut data = BytesMut::with_capacity(8 + body.len());
        data.put_u64_le(xxh3_64(&body));
        data.put_slice(&body);

        let tmp = self.dir.join(SNAPSHOT_TMP_FILE);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(SNAPSHOT_FILE))?;

        let file = writer
            .file
            .as_ref()
            .ok_or_else(|| StorageError::transport("write-ahead log is not open"))?;
        file.set_len(0)?;
        file.sync_all()?;
        writer.len = 0;
        writer.since_snapshot = 0;
        writer.unsynced = 0;
        self.stats.snapshots_taken.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(target: "sdnstats::wal", bytes = body.len(), "Wrote snapshot and truncated log");
        Ok(())
    }

    /// Get statistics.
    pub fn stats(&self) -> WalStatsSnapshot {
        WalStatsSnapshot {
            entries_written: self.stats.entries_written.load(AtomicOrdering::Relaxed),
            bytes_written: self.stats.bytes_written.load(AtomicOrdering::Relaxed),
            syncs_performed: self.stats.syncs_performed.load(AtomicOrdering::Relaxed),
            snapshots_taken: self.stats.snapshots_taken.load(AtomicOrdering::Relaxed),
            entries_recovered: self.stats.entries_recovered.load(AtomicOrdering::Relaxed),
        }
    }
}

impl ColumnStore for WalStore {
    fn name(&self) -> &'static str {
        "wal"
    }

    fn create_column_family(&self, def: &ColumnFamilyDef) -> StorageResult<()> {
        self.memory.check_create(def)?;
        if self.memory.family_names().iter().any(|n| n == &def.name) {
            return Ok(());
        }
        self.log_and_apply(WalEntry::CreateFamily(def.clone()), |m| {
            m.create_column_family(def)
        })
    }

    fn column_families(&self) -> StorageResult<Vec<String>> {
        Ok(self.memory.family_names())
    }

    fn get_slice(&self, family: &str, key: &str, range: &SliceRange) -> StorageResult<Vec<Column>> {
        self.memory.get_slice(family, key, range)
    }

    fn get_super_slice(
        &self,
        family: &str,
        key: &str,
        range: &SliceRange,
    ) -> StorageResult<Vec<SuperColumn>> {
        self.memory.get_super_slice(family, key, range)
    }

    fn get_range_super_slices(
        &self,
        family: &str,
        keys: &KeyRange,
        range: &SliceRange,
    ) -> StorageResult<Vec<KeySlice<SuperColumn>>> {
        self.memory.get_range_super_slices(family, keys, range)
    }

    fn batch_mutate(&self, batch: &MutationBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.memory.validate_batch(batch)?;
        self.log_and_apply(WalEntry::Batch(batch.clone()), |m| m.batch_mutate(batch))
    }

    fn remove(&self, family: &str, key: &str, timestamp: i64) -> StorageResult<()> {
        self.memory.check_family(family)?;
        let entry = WalEntry::Remove {
            family: family.to_string(),
            key: key.to_string(),
            timestamp,
        };
        self.log_and_apply(entry, |m| m.remove(family, key, timestamp))
    }

    fn truncate(&self, family: &str) -> StorageResult<()> {
        self.memory.check_family(family)?;
        let entry = WalEntry::Truncate {
            family: family.to_string(),
        };
        self.log_and_apply(entry, |m| m.truncate(family))
    }

    fn reconnect(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        writer.file = None;
        let file = self.open_log()?;
        // Bytes past the last complete record belong to a failed append.
        file.set_len(writer.len)?;
        file.sync_all()?;
        writer.file = Some(file);
        writer.unsynced = 0;
        info!(
            target: "sdnstats::wal",
            dir = %self.dir.display(),
            len = writer.len,
            "Reopened write-ahead log"
        );
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        let file = writer
            .file
            .as_ref()
            .ok_or_else(|| StorageError::transport("write-ahead log is not open"))?;
        file.sync_data()?;
        writer.unsynced = 0;
        self.stats.syncs_performed.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Compacts memory, then folds it into a fresh snapshot so the purge
    /// survives a restart.
    fn compact(&self, horizon: i64) -> StorageResult<usize> {
        let mut writer = self.writer.lock();
        let purged = self.memory.compact(horizon)?;
        if purged > 0 {
            self.write_snapshot(&mut writer)?;
        }
        Ok(purged)
    }
}
