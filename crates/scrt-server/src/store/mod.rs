pub mod codec;
pub mod crypto;
pub mod db;
pub mod error;
pub mod model;
pub mod shard;

pub use db::Store;
pub use error::{CodecError, StoreError};
pub use model::{SecretId, SecretRecord, SecretView, MAX_TEXT_LEN};
pub use shard::{ShardKey, ShardLog};
