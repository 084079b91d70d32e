use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use zeroize::ZeroizeOnDrop;

use super::error::CodecError;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// One AES block, prepended to every ciphertext.
pub const IV_LEN: usize = 16;

/// 32-byte AES key. Lives only in process memory.
#[derive(ZeroizeOnDrop)]
struct CipherKey([u8; KEY_LEN]);

/// Per-store symmetric cipher: AES-256 in CFB mode with a random IV per call.
///
/// The output carries no authentication tag. Tampered ciphertext decrypts to
/// garbage instead of failing.
pub struct CipherContext {
    key: CipherKey,
}

impl CipherContext {
    /// Draw a fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key: CipherKey(key) }
    }

    /// Encrypt `plaintext`, returning `IV || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; IV_LEN + plaintext.len()];
        let (iv, body) = out.split_at_mut(IV_LEN);
        OsRng.fill_bytes(iv);
        body.copy_from_slice(plaintext);

        Aes256CfbEnc::new(&self.key.0.into(), (&*iv).into()).encrypt(body);
        out
    }

    /// Split the leading IV off `encrypted` and decrypt the remainder.
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, CodecError> {
        if encrypted.len() < IV_LEN {
            return Err(CodecError::ShortCiphertext(encrypted.len()));
        }
        let (iv, body) = encrypted.split_at(IV_LEN);
        let mut plaintext = body.to_vec();

        Aes256CfbDec::new(&self.key.0.into(), iv.into()).decrypt(&mut plaintext);
        Ok(plaintext)
    }
}
