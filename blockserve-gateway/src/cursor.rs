//! Block cursor
//!
//! Reassembles a file from its manifest one bounded read at a time. The
//! cursor tracks the current block, the bytes left in that block and the
//! bytes left to deliver. It covers three shapes of transfer:
//!
//! - the whole file, optionally through a per-block decrypt stage
//! - a byte range of an unencrypted file, positioned on the first step
//! - a single raw block, never decrypted

use crate::session::{Chunk, SessionError, TransferSource};
use blockserve_core::block::{BlockId, FileManifest, StoreRef};
use blockserve_core::crypto::{BlockDecryptor, CipherKey};
use blockserve_core::error::BlockServeError;
use blockserve_core::range::ByteRange;
use blockserve_storage::{BlockHandle, BlockStore};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

/// Decrypt stage for one file. A fresh context is created when each block is
/// opened and finalized when that block's last ciphertext byte is consumed.
struct CipherStage {
    key: CipherKey,
    ctx: Option<BlockDecryptor>,
}

impl CipherStage {
    fn new(key: CipherKey) -> Self {
        Self { key, ctx: None }
    }

    fn begin_block(&mut self) -> Result<(), SessionError> {
        self.ctx = Some(BlockDecryptor::new(&self.key)?);
        Ok(())
    }

    fn update(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), SessionError> {
        let ctx = self.ctx.as_mut().ok_or_else(missing_context)?;
        ctx.update(ciphertext, out)?;
        Ok(())
    }

    fn finish_block(&mut self, out: &mut Vec<u8>) -> Result<(), SessionError> {
        let ctx = self.ctx.take().ok_or_else(missing_context)?;
        ctx.finalize(out)?;
        Ok(())
    }

    fn discard(&mut self) {
        self.ctx = None;
    }
}

fn missing_context() -> BlockServeError {
    BlockServeError::Internal("no decrypt context for current block".to_string())
}

pub struct BlockCursor {
    blocks: Arc<dyn BlockStore>,
    store: StoreRef,
    manifest: FileManifest,

    /// Index of the block being read (or to be opened next)
    index: usize,
    handle: Option<Box<dyn BlockHandle>>,

    /// Stored bytes not yet read from the open block
    block_remaining: u64,

    /// Bytes to deliver in total, and still to deliver
    total: u64,
    remaining: u64,

    /// Range start not yet positioned at
    seek_to: Option<u64>,

    cipher: Option<CipherStage>,
    buf: Vec<u8>,
    plain: Vec<u8>,
}

impl BlockCursor {
    fn new(
        blocks: Arc<dyn BlockStore>,
        store: StoreRef,
        manifest: FileManifest,
        remaining: u64,
        buffer_size: usize,
    ) -> Self {
        Self {
            blocks,
            store,
            manifest,
            index: 0,
            handle: None,
            block_remaining: 0,
            total: remaining,
            remaining,
            seek_to: None,
            cipher: None,
            buf: vec![0u8; buffer_size.max(1)],
            plain: Vec::new(),
        }
    }

    /// Deliver a whole file, decrypting each block when `key` is given
    pub fn whole_file(
        blocks: Arc<dyn BlockStore>,
        store: StoreRef,
        manifest: FileManifest,
        key: Option<CipherKey>,
        buffer_size: usize,
    ) -> Self {
        let size = manifest.file_size;
        let mut cursor = Self::new(blocks, store, manifest, size, buffer_size);
        cursor.cipher = key.map(CipherStage::new);
        cursor
    }

    /// Deliver one resolved byte range of an unencrypted file
    pub fn range(
        blocks: Arc<dyn BlockStore>,
        store: StoreRef,
        manifest: FileManifest,
        range: ByteRange,
        buffer_size: usize,
    ) -> Self {
        let mut cursor = Self::new(blocks, store, manifest, range.len(), buffer_size);
        cursor.seek_to = Some(range.start);
        cursor
    }

    /// Deliver one stored block as-is
    pub fn single_block(
        blocks: Arc<dyn BlockStore>,
        store: StoreRef,
        id: BlockId,
        size: u64,
        buffer_size: usize,
    ) -> Self {
        let manifest = FileManifest::new(size, vec![id]);
        Self::new(blocks, store, manifest, size, buffer_size)
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn block_index(&self) -> usize {
        self.index
    }

    fn open_current(&mut self) -> Result<(), SessionError> {
        let id = &self.manifest.blocks[self.index];
        let handle = self.blocks.open_block(&self.store, id)?;
        self.block_remaining = handle.metadata().size;
        trace!(block_id = %id, index = self.index, size = self.block_remaining, "Opened block");

        if let Some(cipher) = self.cipher.as_mut() {
            cipher.begin_block()?;
        }
        self.handle = Some(handle);
        Ok(())
    }

    /// Close the current block and move on to the next one
    fn advance(&mut self) {
        self.handle = None;
        self.index += 1;
    }

    fn read_current(&mut self, want: usize) -> Result<usize, SessionError> {
        let n = match self.handle.as_mut() {
            Some(handle) => handle.read(&mut self.buf[..want])?,
            None => 0,
        };
        self.block_remaining = self.block_remaining.saturating_sub(n as u64);
        Ok(n)
    }

    /// Find the block holding `offset` by summing block sizes (stat only, no
    /// content reads), open it and discard the bytes before `offset`
    fn position(&mut self, offset: u64) -> Result<(), SessionError> {
        let mut before = 0u64;
        let mut found = None;
        for (i, id) in self.manifest.blocks.iter().enumerate() {
            let size = self.blocks.stat_block(&self.store, id)?.size;
            if before + size > offset {
                found = Some(i);
                break;
            }
            before += size;
        }

        let index = found.ok_or(SessionError::RangeOutsideBlocks { offset })?;
        self.index = index;
        self.open_current()?;

        let mut skip = offset - before;
        debug!(index, skip, "Positioned range cursor");
        while skip > 0 {
            let want = (skip.min(self.buf.len() as u64)) as usize;
            let n = self.read_current(want)?;
            if n == 0 {
                return Err(SessionError::RangeOutsideBlocks { offset });
            }
            skip -= n as u64;
        }
        Ok(())
    }

    /// Next plaintext from an unencrypted block, or `None` after moving past
    /// an exhausted block
    fn step_plain(&mut self) -> Result<Option<Bytes>, SessionError> {
        let want = (self.remaining.min(self.buf.len() as u64)) as usize;
        let n = self.read_current(want)?;
        if n == 0 {
            self.advance();
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }

    /// Next plaintext from an encrypted block. Output may be shorter or
    /// longer than the ciphertext read; `None` means nothing is ready yet.
    fn step_encrypted(&mut self) -> Result<Option<Bytes>, SessionError> {
        self.plain.clear();

        let want = (self.block_remaining.min(self.buf.len() as u64)) as usize;
        if want > 0 {
            let n = self.read_current(want)?;
            if n == 0 {
                return Err(SessionError::Truncated {
                    missing: self.remaining,
                });
            }
            if let Some(cipher) = self.cipher.as_mut() {
                cipher.update(&self.buf[..n], &mut self.plain)?;
            }
        }

        if self.block_remaining == 0 {
            if let Some(cipher) = self.cipher.as_mut() {
                cipher.finish_block(&mut self.plain)?;
            }
            self.advance();
        }

        if self.plain.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.plain)))
    }
}

impl TransferSource for BlockCursor {
    fn start(&mut self) -> Result<(), SessionError> {
        match self.seek_to.take() {
            Some(offset) => self.position(offset),
            None => Ok(()),
        }
    }

    fn next_chunk(&mut self) -> Result<Chunk, SessionError> {
        loop {
            if self.remaining == 0 {
                self.release();
                return Ok(Chunk::last(Bytes::new()));
            }

            if self.handle.is_none() {
                if self.index >= self.manifest.blocks.len() {
                    return Err(SessionError::Truncated {
                        missing: self.remaining,
                    });
                }
                self.open_current()?;
            }

            let data = if self.cipher.is_some() {
                self.step_encrypted()?
            } else {
                self.step_plain()?
            };

            if let Some(data) = data {
                let len = data.len() as u64;
                if len > self.remaining {
                    return Err(SessionError::Overrun {
                        expected: self.total,
                    });
                }
                self.remaining -= len;
                if self.remaining == 0 {
                    self.release();
                    return Ok(Chunk::last(data));
                }
                return Ok(Chunk::more(data));
            }
        }
    }

    fn release(&mut self) {
        self.handle = None;
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingBlockStore;
    use blockserve_core::crypto::{encrypt_block, CipherVersion};
    use blockserve_core::range::parse_range;
    use proptest::prelude::*;

    fn store() -> StoreRef {
        StoreRef::new("store-1", 1)
    }

    fn file_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn seed(blocks: &CountingBlockStore, data: &[u8], block_size: usize) -> FileManifest {
        blocks.inner().put_file(&store(), data, block_size).unwrap()
    }

    fn drain(cursor: &mut BlockCursor) -> Result<Vec<u8>, SessionError> {
        cursor.start()?;
        let mut out = Vec::new();
        loop {
            let chunk = cursor.next_chunk()?;
            out.extend_from_slice(&chunk.data);
            if chunk.done {
                return Ok(out);
            }
        }
    }

    #[test]
    fn test_whole_file_in_order() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(10_000);
        let manifest = seed(&blocks, &data, 3_000);

        let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, None, 1024);
        assert_eq!(drain(&mut cursor).unwrap(), data);
        assert_eq!(blocks.opens(), 4);
        blocks.assert_balanced();
    }

    #[test]
    fn test_reads_are_bounded_by_buffer() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(5_000);
        let manifest = seed(&blocks, &data, 5_000);

        let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, None, 512);
        cursor.start().unwrap();
        let chunk = cursor.next_chunk().unwrap();
        assert_eq!(chunk.data.len(), 512);
        assert!(!chunk.done);
        assert_eq!(cursor.remaining(), 5_000 - 512);
    }

    #[test]
    fn test_range_positions_by_stat() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(10_000);
        let manifest = seed(&blocks, &data, 1_000);

        let range = parse_range("bytes=4500-6499", 10_000).unwrap();
        let mut cursor = BlockCursor::range(blocks.clone(), store(), manifest, range, 256);
        assert_eq!(drain(&mut cursor).unwrap(), &data[4500..6500]);

        // Blocks 0..=4 were stat'ed to find the start; only 4, 5 and 6 opened
        assert_eq!(blocks.stats(), 5);
        assert_eq!(blocks.opens(), 3);
        blocks.assert_balanced();
    }

    #[test]
    fn test_range_on_block_boundary() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(3_000);
        let manifest = seed(&blocks, &data, 1_000);

        let range = parse_range("bytes=1000-1999", 3_000).unwrap();
        let mut cursor = BlockCursor::range(blocks.clone(), store(), manifest, range, 300);
        assert_eq!(drain(&mut cursor).unwrap(), &data[1000..2000]);
        assert_eq!(cursor.block_index(), 1);
        blocks.assert_balanced();
    }

    #[test]
    fn test_suffix_range() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(100);
        let manifest = seed(&blocks, &data, 30);

        let range = parse_range("bytes=-10", 100).unwrap();
        let mut cursor = BlockCursor::range(blocks.clone(), store(), manifest, range, 64);
        assert_eq!(drain(&mut cursor).unwrap(), &data[90..]);
        blocks.assert_balanced();
    }

    #[test]
    fn test_range_past_blocks_fails() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(100);
        let mut manifest = seed(&blocks, &data, 50);
        // Manifest claims more than its blocks hold
        manifest.file_size = 500;

        let range = ByteRange { start: 200, end: 299 };
        let mut cursor = BlockCursor::range(blocks.clone(), store(), manifest, range, 64);
        assert!(matches!(
            cursor.start(),
            Err(SessionError::RangeOutsideBlocks { offset: 200 })
        ));
        cursor.release();
        blocks.assert_balanced();
    }

    #[test]
    fn test_missing_block_fails() {
        let blocks = Arc::new(CountingBlockStore::new());
        let manifest = FileManifest::new(10, vec![BlockId::for_content(b"absent")]);

        let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, None, 64);
        let err = cursor.next_chunk().unwrap_err();
        assert!(matches!(err, SessionError::Block(ref e) if e.is_not_found()));
    }

    #[test]
    fn test_read_error_mid_block() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(2_000);
        let manifest = seed(&blocks, &data, 1_000);
        blocks.fail_reads(manifest.blocks[1].clone(), 300);

        let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, None, 256);
        assert!(drain(&mut cursor).is_err());
        cursor.release();
        cursor.release();
        assert_eq!(blocks.opens(), 2);
        blocks.assert_balanced();
    }

    #[test]
    fn test_short_manifest_is_truncated() {
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(100);
        let mut manifest = seed(&blocks, &data, 100);
        manifest.file_size = 150;

        let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, None, 64);
        assert!(matches!(
            drain(&mut cursor),
            Err(SessionError::Truncated { missing: 50 })
        ));
    }

    #[test]
    fn test_single_block_is_raw() {
        let blocks = Arc::new(CountingBlockStore::new());
        let id = blocks.inner().put(&store(), Bytes::from_static(b"raw ciphertext"));

        let mut cursor = BlockCursor::single_block(blocks.clone(), store(), id, 14, 4);
        assert_eq!(drain(&mut cursor).unwrap(), b"raw ciphertext");
        blocks.assert_balanced();
    }

    fn seed_encrypted(
        blocks: &CountingBlockStore,
        data: &[u8],
        block_size: usize,
        key: &CipherKey,
    ) -> FileManifest {
        let ids = data
            .chunks(block_size)
            .map(|plain| {
                let id = BlockId::for_content(plain);
                let cipher = encrypt_block(plain, key).unwrap();
                blocks.inner().put_with_id(&store(), id.clone(), cipher);
                id
            })
            .collect();
        FileManifest::new(data.len() as u64, ids)
    }

    #[test]
    fn test_encrypted_round_trip() {
        for (version, key_len) in [(CipherVersion::Aes128Cbc, 16), (CipherVersion::Aes256Cbc, 32)] {
            let key = CipherKey::new(version, &vec![3u8; key_len], &[4u8; 16]).unwrap();
            let blocks = Arc::new(CountingBlockStore::new());
            // 2 full blocks plus a tail, block size aligned to the cipher block
            let data = file_data(2 * 4096 + 77);
            let manifest = seed_encrypted(&blocks, &data, 4096, &key);

            let mut cursor =
                BlockCursor::whole_file(blocks.clone(), store(), manifest, Some(key), 1000);
            assert_eq!(drain(&mut cursor).unwrap(), data);
            assert_eq!(blocks.opens(), 3);
            blocks.assert_balanced();
        }
    }

    #[test]
    fn test_wrong_key_aborts() {
        let right = CipherKey::new(CipherVersion::Aes256Cbc, &[1u8; 32], &[2u8; 16]).unwrap();
        let wrong = CipherKey::new(CipherVersion::Aes256Cbc, &[9u8; 32], &[2u8; 16]).unwrap();
        let blocks = Arc::new(CountingBlockStore::new());
        let data = file_data(100);
        let manifest = seed_encrypted(&blocks, &data, 100, &right);

        let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, Some(wrong), 64);
        assert!(drain(&mut cursor).is_err());
        cursor.release();
        blocks.assert_balanced();
    }

    proptest! {
        #[test]
        fn prop_output_independent_of_buffer_size(
            len in 1usize..20_000,
            block_size in 1usize..5_000,
            buffer in 1usize..9_000,
        ) {
            let blocks = Arc::new(CountingBlockStore::new());
            let data = file_data(len);
            let manifest = seed(&blocks, &data, block_size);

            let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, None, buffer);
            prop_assert_eq!(drain(&mut cursor).unwrap(), data);
            prop_assert_eq!(blocks.opens(), blocks.closes());
        }

        #[test]
        fn prop_range_delivers_exact_slice(
            len in 1u64..10_000,
            a in 0u64..10_000,
            b in 0u64..10_000,
            block_size in 1usize..3_000,
            buffer in 1usize..4_000,
        ) {
            let blocks = Arc::new(CountingBlockStore::new());
            let data = file_data(len as usize);
            let manifest = seed(&blocks, &data, block_size);

            if let Ok(range) = parse_range(&format!("bytes={}-{}", a, b), len) {
                let mut cursor = BlockCursor::range(blocks.clone(), store(), manifest, range, buffer);
                let out = drain(&mut cursor).unwrap();
                prop_assert_eq!(out.len() as u64, range.len());
                prop_assert_eq!(&out[..], &data[range.start as usize..=range.end as usize]);
                prop_assert_eq!(blocks.opens(), blocks.closes());
            }
        }

        #[test]
        fn prop_encrypted_independent_of_buffer_size(
            len in 1usize..6_000,
            buffer in 1usize..3_000,
        ) {
            let key = CipherKey::new(CipherVersion::Aes128Cbc, &[5u8; 16], &[6u8; 16]).unwrap();
            let blocks = Arc::new(CountingBlockStore::new());
            let data = file_data(len);
            let manifest = seed_encrypted(&blocks, &data, 1024, &key);

            let mut cursor = BlockCursor::whole_file(blocks.clone(), store(), manifest, Some(key), buffer);
            prop_assert_eq!(drain(&mut cursor).unwrap(), data);
        }
    }
}
