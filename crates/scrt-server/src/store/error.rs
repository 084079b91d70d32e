use std::io;

use thiserror::Error;

/// Failures while encoding or decoding the persisted record layout.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Fewer bytes were available than the record layout requires.
    /// Scans treat this as "end of shard reached".
    #[error("record is truncated")]
    Truncated,

    #[error("ciphertext of {0} bytes does not fit the one-byte length field")]
    Oversized(usize),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    #[error("ciphertext of {0} bytes is shorter than the IV")]
    ShortCiphertext(usize),

    #[error("record span {offset}+{len} exceeds shard length {shard_len}")]
    SpanOutOfBounds { offset: u64, len: u64, shard_len: u64 },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("text of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("invalid secret id: {0}")]
    InvalidIdentifier(String),

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("corrupt record: {0}")]
    Decode(#[from] CodecError),

    /// The shift/truncate sequence did not complete; the shard may need manual repair.
    #[error("compaction of shard {shard} failed: {source}")]
    Compaction {
        shard: String,
        #[source]
        source: io::Error,
    },

    /// An append failed and the partial record could not be cut off again.
    #[error("rollback of failed append to shard {shard} failed: {source}")]
    Rollback {
        shard: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Caller mistakes that are reported back verbatim and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::PayloadTooLarge { .. } | StoreError::InvalidIdentifier(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
