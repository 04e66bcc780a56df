//! Cryptographic primitives for blockserve
//!
//! Provides:
//! - Blake3 content hashing for block addressing
//! - Per-block AES-CBC decryption with incremental input and PKCS#7 finalization
//!
//! Encrypted repositories store every block as an independent CBC stream
//! produced with the same per-file key and IV. A [`BlockDecryptor`] is the
//! decrypt context for exactly one block: it is created when the block is
//! opened, fed ciphertext chunks as they are read, and consumed by
//! [`BlockDecryptor::finalize`] once the last chunk of the block arrives.

use crate::error::{BlockServeError, Result};
use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::{Pkcs7, RawPadding};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::fmt;

/// AES block size in bytes
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// IV size in bytes
pub const IV_SIZE: usize = 16;

/// Blake3 hash wrapper for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
    /// Compute Blake3 hash of data
    pub fn compute(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    /// Get the raw hash bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// Verify that data matches this hash
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Block cipher selected by a repository's encryption version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherVersion {
    /// Encryption version 1: AES-128-CBC
    Aes128Cbc,
    /// Every other encryption version: AES-256-CBC
    Aes256Cbc,
}

impl CipherVersion {
    /// Map a repository encryption version onto its cipher. Only version 1
    /// uses a 16-byte key; every other version uses a 32-byte key.
    pub fn from_enc_version(enc_version: u32) -> Self {
        match enc_version {
            1 => Self::Aes128Cbc,
            _ => Self::Aes256Cbc,
        }
    }

    /// Required key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes256Cbc => 32,
        }
    }
}

/// Per-file key and IV shared by every block of the file
#[derive(Clone)]
pub struct CipherKey {
    version: CipherVersion,
    key: Vec<u8>,
    iv: [u8; IV_SIZE],
}

impl CipherKey {
    /// Create from raw bytes (validates lengths)
    pub fn new(version: CipherVersion, key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != version.key_len() {
            return Err(BlockServeError::InvalidKeyLength {
                expected: version.key_len(),
                actual: key.len(),
            });
        }
        if iv.len() != IV_SIZE {
            return Err(BlockServeError::InvalidKeyLength {
                expected: IV_SIZE,
                actual: iv.len(),
            });
        }
        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(iv);
        Ok(Self {
            version,
            key: key.to_vec(),
            iv: iv_bytes,
        })
    }

    /// Create from hex-encoded key material as handed out by the key manager.
    ///
    /// Only the first `key_len` bytes of the decoded key are used.
    pub fn from_hex(enc_version: u32, key_hex: &str, iv_hex: &str) -> Result<Self> {
        let version = CipherVersion::from_enc_version(enc_version);
        let key = hex::decode(key_hex)?;
        let iv = hex::decode(iv_hex)?;
        if key.len() < version.key_len() {
            return Err(BlockServeError::InvalidKeyLength {
                expected: version.key_len(),
                actual: key.len(),
            });
        }
        if iv.len() < IV_SIZE {
            return Err(BlockServeError::InvalidKeyLength {
                expected: IV_SIZE,
                actual: iv.len(),
            });
        }
        Self::new(version, &key[..version.key_len()], &iv[..IV_SIZE])
    }

    pub fn version(&self) -> CipherVersion {
        self.version
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherKey({:?}, [REDACTED])", self.version)
    }
}

impl Drop for CipherKey {
    fn drop(&mut self) {
        // Zeroize key on drop
        self.key.iter_mut().for_each(|b| *b = 0);
        self.iv.iter_mut().for_each(|b| *b = 0);
    }
}

enum CbcDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl CbcDecryptor {
    fn new(key: &CipherKey) -> Result<Self> {
        let invalid = |e: cbc::cipher::InvalidLength| BlockServeError::Decryption(e.to_string());
        Ok(match key.version {
            CipherVersion::Aes128Cbc => {
                Self::Aes128(cbc::Decryptor::new_from_slices(&key.key, &key.iv).map_err(invalid)?)
            }
            CipherVersion::Aes256Cbc => {
                Self::Aes256(cbc::Decryptor::new_from_slices(&key.key, &key.iv).map_err(invalid)?)
            }
        })
    }

    /// Decrypt whole cipher blocks in place; `buf.len()` must be a multiple
    /// of the block size.
    fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(d) => d.decrypt_block_mut(block),
                Self::Aes256(d) => d.decrypt_block_mut(block),
            }
        }
    }
}

/// Decrypt context for a single stored block
///
/// Output lags input: the final cipher block is held back until
/// [`finalize`](Self::finalize) because it carries the padding. Callers must
/// write what `update` reports, not the size of the ciphertext they fed in.
pub struct BlockDecryptor {
    cbc: CbcDecryptor,
    pending: Vec<u8>,
}

impl BlockDecryptor {
    /// Start a fresh context for one block
    pub fn new(key: &CipherKey) -> Result<Self> {
        Ok(Self {
            cbc: CbcDecryptor::new(key)?,
            pending: Vec::with_capacity(2 * CIPHER_BLOCK_SIZE),
        })
    }

    /// Feed a ciphertext chunk, appending any plaintext that is now final to
    /// `out`. Returns the number of plaintext bytes appended.
    pub fn update(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        self.pending.extend_from_slice(ciphertext);
        if self.pending.len() <= CIPHER_BLOCK_SIZE {
            return Ok(0);
        }

        // Keep at least one byte (and the last whole block) for finalize.
        let ready = ((self.pending.len() - 1) / CIPHER_BLOCK_SIZE) * CIPHER_BLOCK_SIZE;
        let start = out.len();
        out.extend(self.pending.drain(..ready));
        self.cbc.decrypt_in_place(&mut out[start..]);
        Ok(ready)
    }

    /// Decrypt the held-back final block and strip its PKCS#7 padding.
    /// Consumes the context.
    pub fn finalize(mut self, out: &mut Vec<u8>) -> Result<usize> {
        if self.pending.len() != CIPHER_BLOCK_SIZE {
            return Err(BlockServeError::Decryption(format!(
                "wrong final block length: {}",
                self.pending.len()
            )));
        }

        let mut last = [0u8; CIPHER_BLOCK_SIZE];
        last.copy_from_slice(&self.pending);
        self.cbc.decrypt_in_place(&mut last);

        let plain = Pkcs7::raw_unpad(&last)
            .map_err(|e| BlockServeError::Decryption(format!("bad padding: {}", e)))?;
        out.extend_from_slice(plain);
        Ok(plain.len())
    }
}

/// Encrypt one block's plaintext as stored by encrypted repositories
pub fn encrypt_block(plaintext: &[u8], key: &CipherKey) -> Result<Vec<u8>> {
    let invalid = |e: cbc::cipher::InvalidLength| BlockServeError::Encryption(e.to_string());
    Ok(match key.version {
        CipherVersion::Aes128Cbc => cbc::Encryptor::<Aes128>::new_from_slices(&key.key, &key.iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        CipherVersion::Aes256Cbc => cbc::Encryptor::<Aes256>::new_from_slices(&key.key, &key.iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    })
}

/// Decrypt a whole stored block in one call
pub fn decrypt_block(ciphertext: &[u8], key: &CipherKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(ciphertext.len());
    let mut ctx = BlockDecryptor::new(key)?;
    ctx.update(ciphertext, &mut out)?;
    ctx.finalize(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_256() -> CipherKey {
        CipherKey::new(CipherVersion::Aes256Cbc, &[7u8; 32], &[9u8; 16]).unwrap()
    }

    #[test]
    fn test_content_hash() {
        let data = b"hello world";
        let hash = ContentHash::compute(data);

        assert_eq!(hash, ContentHash::compute(data));
        assert_ne!(hash, ContentHash::compute(b"different data"));
        assert!(hash.verify(data));
        assert!(!hash.verify(b"wrong data"));
    }

    #[test]
    fn test_cipher_version_mapping() {
        assert_eq!(CipherVersion::from_enc_version(1), CipherVersion::Aes128Cbc);
        for version in [0, 2, 3, 4, 5, 7] {
            assert_eq!(
                CipherVersion::from_enc_version(version),
                CipherVersion::Aes256Cbc
            );
        }
    }

    #[test]
    fn test_key_from_hex_accepts_newer_versions() {
        let key_hex = hex::encode([1u8; 32]);
        let iv_hex = hex::encode([2u8; 16]);
        let key = CipherKey::from_hex(5, &key_hex, &iv_hex).unwrap();
        assert_eq!(key.version(), CipherVersion::Aes256Cbc);
    }

    #[test]
    fn test_key_from_hex_truncates_to_version() {
        let key_hex = hex::encode([1u8; 32]);
        let iv_hex = hex::encode([2u8; 16]);

        let v1 = CipherKey::from_hex(1, &key_hex, &iv_hex).unwrap();
        assert_eq!(v1.version(), CipherVersion::Aes128Cbc);

        let short = hex::encode([1u8; 8]);
        assert!(matches!(
            CipherKey::from_hex(2, &short, &iv_hex),
            Err(BlockServeError::InvalidKeyLength { expected: 32, actual: 8 })
        ));
        assert!(CipherKey::from_hex(2, "not hex", &iv_hex).is_err());
    }

    #[test]
    fn test_roundtrip_both_versions() {
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i * 31 % 256) as u8).collect();
        for key in [
            CipherKey::new(CipherVersion::Aes128Cbc, &[3u8; 16], &[4u8; 16]).unwrap(),
            key_256(),
        ] {
            let ciphertext = encrypt_block(&plaintext, &key).unwrap();
            assert_eq!(ciphertext.len() % CIPHER_BLOCK_SIZE, 0);
            assert_eq!(decrypt_block(&ciphertext, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_incremental_output_lags_input() {
        let key = key_256();
        let plaintext = vec![0x5au8; 48];
        let ciphertext = encrypt_block(&plaintext, &key).unwrap();
        // 48 bytes of plaintext pad to 64 bytes of ciphertext
        assert_eq!(ciphertext.len(), 64);

        let mut ctx = BlockDecryptor::new(&key).unwrap();
        let mut out = Vec::new();
        assert_eq!(ctx.update(&ciphertext[..10], &mut out).unwrap(), 0);
        assert_eq!(ctx.update(&ciphertext[10..33], &mut out).unwrap(), 32);
        assert_eq!(ctx.update(&ciphertext[33..], &mut out).unwrap(), 16);
        assert_eq!(ctx.finalize(&mut out).unwrap(), 0);
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_block_aligned_plaintext_gets_full_padding_block() {
        let key = key_256();
        let plaintext = vec![1u8; 32];
        let ciphertext = encrypt_block(&plaintext, &key).unwrap();
        assert_eq!(ciphertext.len(), 48);
        assert_eq!(decrypt_block(&ciphertext, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails_padding_check() {
        let plaintext = b"secret message that spans two blocks";
        let ciphertext = encrypt_block(plaintext, &key_256()).unwrap();
        let other = CipherKey::new(CipherVersion::Aes256Cbc, &[8u8; 32], &[9u8; 16]).unwrap();

        match decrypt_block(&ciphertext, &other) {
            Ok(out) => assert_ne!(out.as_slice(), plaintext.as_slice()),
            Err(e) => assert!(matches!(e, BlockServeError::Decryption(_))),
        }
    }

    #[test]
    fn test_corrupt_padding_is_decryption_error() {
        let key = key_256();
        let mut ciphertext = encrypt_block(b"sixteen byte msg", &key).unwrap();
        assert_eq!(ciphertext.len(), 32);
        // Flipping a byte of the previous block flips the same byte of the
        // final plaintext block, which here is all padding.
        ciphertext[15] ^= 0x01;

        let mut ctx = BlockDecryptor::new(&key).unwrap();
        let mut out = Vec::new();
        ctx.update(&ciphertext, &mut out).unwrap();
        let err = ctx.finalize(&mut out).unwrap_err();
        assert!(matches!(err, BlockServeError::Decryption(ref m) if m.contains("padding")));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = key_256();
        let ciphertext = encrypt_block(b"abc", &key).unwrap();
        assert!(decrypt_block(&ciphertext[..10], &key).is_err());
        assert!(decrypt_block(&[], &key).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let debug = format!("{:?}", key_256());
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("7, 7"));
    }
}
