//! Sharded append-only logs.
//!
//! Every secret lands in the shard named after the first 16 bytes of its id.
//! A shard is a plain file of back-to-back records; lookups replay it from
//! the start, and removal compacts it in place.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::codec;
use super::error::{CodecError, Result, StoreError};
use super::model::{SecretId, SecretRecord};

/// Number of leading id bytes that select a shard.
pub const SHARD_PREFIX_LEN: usize = 16;

const FILE_PREFIX: &str = "scrt_";

/// Hex-encoded id prefix naming one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey(String);

impl ShardKey {
    /// Pure mapping from id to shard; no I/O.
    pub fn locate(id: &SecretId) -> Self {
        Self(hex::encode(&id.as_bytes()[..SHARD_PREFIX_LEN]))
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record found by [`ShardLog::scan_for`], with the byte span it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedRecord {
    pub record: SecretRecord,
    pub offset: u64,
    pub len: u64,
}

/// One shard file. Callers must hold the shard's registry lock.
#[derive(Debug, Clone)]
pub struct ShardLog {
    key: ShardKey,
    path: PathBuf,
}

impl ShardLog {
    pub fn new(dir: &Path, key: ShardKey) -> Self {
        let path = dir.join(format!("{FILE_PREFIX}{key}"));
        Self { key, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes; a missing shard is empty.
    pub fn len(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one encoded record and sync it to disk before returning.
    ///
    /// On failure the shard is cut back to its previous length so no torn
    /// record is left in front of later appends.
    pub fn append(&self, record: &[u8]) -> Result<()> {
        self.append_with(|file| {
            file.write_all(record)?;
            file.sync_all()
        })?;

        debug!(shard = %self.key, bytes = record.len(), "appended record");
        Ok(())
    }

    fn append_with(&self, write: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
        let mut file = open_rw(&self.path, true)?;
        let prev_len = file.seek(SeekFrom::End(0))?;

        if let Err(e) = write(&mut file) {
            file.set_len(prev_len)
                .and_then(|()| file.sync_all())
                .map_err(|source| self.rollback_failed(source))?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Walk the shard from offset 0 looking for `id`.
    ///
    /// Non-matching records are skipped by their declared length without
    /// decoding. Reaching the end of the file (or a torn tail) means absent.
    pub fn scan_for(&self, id: &SecretId) -> Result<Option<LocatedRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;

        loop {
            let header = match codec::read_header(&mut reader) {
                Ok(h) => h,
                Err(StoreError::Decode(CodecError::Truncated)) => return Ok(None),
                Err(e) => return Err(e),
            };

            if header.id == *id {
                let reveal_at = header.reveal_at()?;
                let ciphertext = match codec::read_body(&mut reader, header.ciphertext_len) {
                    Ok(body) => body,
                    Err(StoreError::Decode(CodecError::Truncated)) => return Ok(None),
                    Err(e) => return Err(e),
                };
                return Ok(Some(LocatedRecord {
                    record: SecretRecord {
                        id: header.id,
                        reveal_at,
                        ciphertext,
                    },
                    offset,
                    len: header.record_len(),
                }));
            }

            reader.seek_relative(i64::from(header.ciphertext_len))?;
            offset += header.record_len();
        }
    }

    /// Erase `[offset, offset + len)` by shifting the tail left and truncating.
    ///
    /// A record that spans the whole shard deletes the file instead of
    /// leaving it empty. Returns true when the file was deleted.
    pub fn compact_remove(&self, offset: u64, len: u64) -> Result<bool> {
        let mut file = open_rw(&self.path, false)?;
        let shard_len = file.metadata()?.len();

        let end = offset.checked_add(len).filter(|end| *end <= shard_len);
        let Some(end) = end else {
            return Err(CodecError::SpanOutOfBounds {
                offset,
                len,
                shard_len,
            }
            .into());
        };

        if offset == 0 && end == shard_len {
            drop(file);
            fs::remove_file(&self.path).map_err(|e| self.compaction_failed(e))?;
            debug!(shard = %self.key, "removed last record, deleted shard");
            return Ok(true);
        }

        shift_and_truncate(&mut file, offset, end, shard_len)
            .map_err(|e| self.compaction_failed(e))?;

        debug!(shard = %self.key, offset, len, "compacted record");
        Ok(false)
    }

    /// Delete the shard file. Returns false if it was already gone.
    pub fn remove_file(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn compaction_failed(&self, source: io::Error) -> StoreError {
        error!(shard = %self.key, error = %source, "compaction did not complete");
        StoreError::Compaction {
            shard: self.key.to_string(),
            source,
        }
    }

    fn rollback_failed(&self, source: io::Error) -> StoreError {
        error!(shard = %self.key, error = %source, "failed append left a torn record");
        StoreError::Rollback {
            shard: self.key.to_string(),
            source,
        }
    }
}

fn shift_and_truncate(file: &mut File, offset: u64, end: u64, shard_len: u64) -> io::Result<()> {
    let mut tail = Vec::with_capacity((shard_len - end) as usize);
    file.seek(SeekFrom::Start(end))?;
    file.read_to_end(&mut tail)?;

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&tail)?;
    file.set_len(offset + tail.len() as u64)?;
    file.sync_all()
}

fn open_rw(path: &Path, create: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(create);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Per-shard locks, plus the set of shards this store has appended to.
///
/// Lookups only hold an entry while they run, so misses on shards that were
/// never written leave nothing behind.
#[derive(Default)]
pub struct ShardRegistry {
    slots: Mutex<HashMap<ShardKey, Slot>>,
}

#[derive(Default)]
struct Slot {
    lock: Arc<Mutex<()>>,
    written: bool,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &ShardKey, f: impl FnOnce() -> T) -> T {
        let lock = self.acquire(key, false);
        let out = {
            let _guard = lock.lock();
            f()
        };
        self.release(key, lock);
        out
    }

    /// Like [`ShardRegistry::with_lock`], but first marks `key` for cleanup.
    pub fn with_write_lock<T>(&self, key: &ShardKey, f: impl FnOnce() -> T) -> T {
        let lock = self.acquire(key, true);
        let _guard = lock.lock();
        f()
    }

    /// Shards that have been appended to, in key order.
    pub fn written_keys(&self) -> Vec<ShardKey> {
        let mut keys: Vec<_> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.written)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn acquire(&self, key: &ShardKey, write: bool) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.written |= write;
        slot.lock.clone()
    }

    fn release(&self, key: &ShardKey, lock: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock();
        // Two references: the map's and ours. Anyone else waiting keeps it alive.
        let idle = slots
            .get(key)
            .is_some_and(|slot| !slot.written && Arc::strong_count(&slot.lock) == 2);
        if idle {
            slots.remove(key);
        }
        drop(lock);
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.slots.lock().len()
    }
}
