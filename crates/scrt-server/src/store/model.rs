use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};

use super::crypto::IV_LEN;
use super::error::StoreError;

/// Raw identifier width in bytes.
pub const ID_LEN: usize = 32;

/// Identifier width once hex-encoded.
pub const ID_HEX_LEN: usize = ID_LEN * 2;

/// Largest ciphertext the one-byte length field can describe.
pub const MAX_CIPHERTEXT_LEN: usize = u8::MAX as usize;

/// Largest plaintext (in bytes) that still fits after the IV.
pub const MAX_TEXT_LEN: usize = MAX_CIPHERTEXT_LEN - IV_LEN;

/// Random 32-byte secret identifier, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretId([u8; ID_LEN]);

impl SecretId {
    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        OsRng.fill_bytes(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl FromStr for SecretId {
    type Err = StoreError;

    /// Accepts exactly 64 hex characters, either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_HEX_LEN {
            return Err(StoreError::InvalidIdentifier(format!(
                "expected {ID_HEX_LEN} hex characters, got {}",
                s.len()
            )));
        }
        let mut id = [0u8; ID_LEN];
        hex::decode_to_slice(s, &mut id)
            .map_err(|e| StoreError::InvalidIdentifier(e.to_string()))?;
        Ok(Self(id))
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Hex, not a byte array.
impl fmt::Debug for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretId({self})")
    }
}

/// One persisted secret: identifier, reveal time, and `IV || ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: SecretId,
    pub reveal_at: DateTime<Utc>,
    pub ciphertext: Vec<u8>,
}

/// What a fetch is allowed to expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretView {
    /// Reveal time has not passed yet; only the time is disclosed.
    Sealed { reveal_at: DateTime<Utc> },
    /// Reveal time has passed; the plaintext is returned.
    Revealed { text: String },
}
