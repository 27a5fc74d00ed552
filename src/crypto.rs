//! Per-tuple encryption.
//!
//! The cipher is a CTR-style keystream over the tuple payload: block `i` of
//! the stream is `SHA-256(key ‖ nonce ‖ i)`, XORed word-wise over the
//! payload (see [`Tuple::payload_words`]). The `is_encrypted` flag and the
//! `nonce` are never transformed; every encryption draws a fresh random
//! nonce. Decrypting with the wrong key surfaces as invalid field codes
//! rather than silent garbage.
//!
//! Key material is zeroized on drop.

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ObliJoinError;
use crate::tuple::{Openness, PAYLOAD_WORDS, Tuple, TupleKind};

/// Cipher key length in bytes.
pub const KEY_BYTES: usize = 32;

/// Encrypts and decrypts single tuples or batches under one key.
///
/// Call outcomes map onto [`ObliJoinError`]'s crypto variants:
/// already-encrypted, not-encrypted, and invalid-ciphertext.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TupleCryptor {
    key: [u8; KEY_BYTES],
}

impl TupleCryptor {
    /// Cryptor with a freshly generated random key.
    pub fn generate() -> TupleCryptor {
        let mut key = [0u8; KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut key);
        TupleCryptor { key }
    }

    pub fn from_key(key: [u8; KEY_BYTES]) -> TupleCryptor {
        TupleCryptor { key }
    }

    /// Parse a 64-hex-digit key string (the key-file format).
    pub fn from_hex(hex: &str) -> Result<TupleCryptor, ObliJoinError> {
        let hex = hex.trim();
        if hex.len() != KEY_BYTES * 2 {
            return Err(ObliJoinError::InvalidKey(format!(
                "expected {} hex digits, got {}",
                KEY_BYTES * 2,
                hex.len()
            )));
        }
        let mut key = [0u8; KEY_BYTES];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|_| ObliJoinError::InvalidKey("non-hex digit".into()))?;
        }
        Ok(TupleCryptor { key })
    }

    pub fn key_hex(&self) -> String {
        self.key.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Encrypt one tuple in place. Fails if it is already encrypted.
    pub fn encrypt(&self, tuple: &mut Tuple) -> Result<(), ObliJoinError> {
        if tuple.is_encrypted {
            return Err(ObliJoinError::AlreadyEncrypted);
        }
        let nonce = rand::thread_rng().next_u64();
        self.apply_keystream(tuple, nonce);
        tuple.nonce = nonce;
        tuple.is_encrypted = true;
        Ok(())
    }

    /// Decrypt one tuple in place. Fails if it is not encrypted, or if the
    /// recovered discriminant codes are invalid (wrong key, corruption).
    pub fn decrypt(&self, tuple: &mut Tuple) -> Result<(), ObliJoinError> {
        if !tuple.is_encrypted {
            return Err(ObliJoinError::NotEncrypted);
        }
        self.apply_keystream(tuple, tuple.nonce);
        tuple.is_encrypted = false;
        tuple.nonce = 0;
        if TupleKind::from_code(tuple.kind).is_none()
            || Openness::from_code(tuple.openness).is_none()
        {
            return Err(ObliJoinError::InvalidCiphertext);
        }
        Ok(())
    }

    pub fn encrypt_batch(&self, tuples: &mut [Tuple]) -> Result<(), ObliJoinError> {
        for t in tuples {
            self.encrypt(t)?;
        }
        Ok(())
    }

    pub fn decrypt_batch(&self, tuples: &mut [Tuple]) -> Result<(), ObliJoinError> {
        for t in tuples {
            self.decrypt(t)?;
        }
        Ok(())
    }

    /// XOR the payload with the keystream for `nonce`; its own inverse.
    fn apply_keystream(&self, tuple: &mut Tuple, nonce: u64) {
        let mut words = tuple.payload_words();
        let mut offset = 0usize;
        let mut block_no = 0u64;
        while offset < PAYLOAD_WORDS {
            let block = self.keystream_block(nonce, block_no);
            for word in &block {
                if offset == PAYLOAD_WORDS {
                    break;
                }
                words[offset] ^= *word as i64;
                offset += 1;
            }
            block_no += 1;
        }
        tuple.set_payload_words(&words);
    }

    /// Four keystream words: `SHA-256(key ‖ nonce ‖ block_no)`.
    fn keystream_block(&self, nonce: u64, block_no: u64) -> [u64; 4] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(nonce.to_le_bytes());
        hasher.update(block_no.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u64; 4];
        for (i, word) in out.iter_mut().enumerate() {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[8 * i..8 * (i + 1)]);
            *word = u64::from_le_bytes(bytes);
        }
        out
    }
}
