use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::codec::encode_record;
use super::crypto::CipherContext;
use super::error::{Result, StoreError};
use super::model::{SecretId, SecretRecord, SecretView, MAX_TEXT_LEN};
use super::shard::{LocatedRecord, ShardKey, ShardLog, ShardRegistry};

/// Thread-safe handle to the shard directory.
///
/// The cipher key is generated on open and never persisted, so only this
/// process can read what it writes. Call [`Store::shutdown`] to delete every
/// shard file it touched.
#[derive(Clone)]
pub struct Store {
    dir: Arc<PathBuf>,
    cipher: Arc<CipherContext>,
    shards: Arc<ShardRegistry>,
}

impl Store {
    /// Use `dir` for shard files (created if missing) with a fresh random key.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: Arc::new(dir.to_owned()),
            cipher: Arc::new(CipherContext::generate()),
            shards: Arc::new(ShardRegistry::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encrypt and durably append `text`, returning its new id.
    pub fn create(&self, text: &str, reveal_at: DateTime<Utc>) -> Result<SecretId> {
        let id = SecretId::generate();
        self.create_with_id(id, text, reveal_at)?;
        Ok(id)
    }

    fn create_with_id(&self, id: SecretId, text: &str, reveal_at: DateTime<Utc>) -> Result<()> {
        if text.len() > MAX_TEXT_LEN {
            return Err(StoreError::PayloadTooLarge {
                len: text.len(),
                max: MAX_TEXT_LEN,
            });
        }

        let record = SecretRecord {
            id,
            reveal_at,
            ciphertext: self.cipher.encrypt(text.as_bytes()),
        };
        let bytes = encode_record(&record)?;

        let key = ShardKey::locate(&id);
        self.shards
            .with_write_lock(&key, || ShardLog::new(&self.dir, key.clone()).append(&bytes))
    }

    /// Look up `id` as of the current time.
    pub fn fetch(&self, id: &str) -> Result<Option<SecretView>> {
        self.fetch_at(id, Utc::now())
    }

    /// Look up `id` as of `now`. Plaintext is only decrypted once
    /// `reveal_at < now`; fetching never consumes the secret.
    pub fn fetch_at(&self, id: &str, now: DateTime<Utc>) -> Result<Option<SecretView>> {
        let id: SecretId = id.parse()?;
        let Some(found) = self.locate(&id)? else {
            return Ok(None);
        };

        let record = found.record;
        if record.reveal_at >= now {
            return Ok(Some(SecretView::Sealed {
                reveal_at: record.reveal_at,
            }));
        }

        let plaintext = self.cipher.decrypt(&record.ciphertext)?;
        Ok(Some(SecretView::Revealed {
            text: String::from_utf8_lossy(&plaintext).into_owned(),
        }))
    }

    /// Compact `id` out of its shard. Returns true if it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let id: SecretId = id.parse()?;
        let key = ShardKey::locate(&id);
        self.shards.with_lock(&key, || {
            let log = ShardLog::new(&self.dir, key.clone());
            match log.scan_for(&id)? {
                Some(found) => {
                    log.compact_remove(found.offset, found.len)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Delete every shard file this store has appended to. Failures are
    /// logged and skipped. Returns the number of files deleted.
    pub fn shutdown(&self) -> usize {
        let mut removed = 0usize;
        for key in self.shards.written_keys() {
            let deleted = self
                .shards
                .with_lock(&key, || ShardLog::new(&self.dir, key.clone()).remove_file());
            match deleted {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(shard = %key, error = %e, "failed to delete shard file"),
            }
        }
        info!(removed, dir = %self.dir.display(), "store shut down");
        removed
    }

    fn locate(&self, id: &SecretId) -> Result<Option<LocatedRecord>> {
        let key = ShardKey::locate(id);
        let found = self
            .shards
            .with_lock(&key, || ShardLog::new(&self.dir, key.clone()).scan_for(id))?;
        if found.is_none() {
            debug!(shard = %key, "secret not found");
        }
        Ok(found)
    }
}
