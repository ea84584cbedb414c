//! # Chunking
//!
//! Cuts byte streams into fixed-size blocks and reassembles them.
//!
//! ## Invariants
//! - Every block except the last is exactly `block_size` bytes.
//! - An empty stream is one empty block, never zero blocks.
//! - Block `i` covers bytes `[i * block_size, min((i + 1) * block_size, len))`.

use crate::error::Error;
use crate::error::Result;

/// Largest single transaction the channel accepts, in bytes.
pub const BLOCK_SIZE: usize = 250_000;

/// Number of blocks a stream of `len` bytes occupies.
pub fn block_count(len: usize, block_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(block_size.max(1))
    }
}

/// Splits `bytes` into blocks of at most `block_size` bytes.
pub fn split(bytes: &[u8], block_size: usize) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return vec![bytes];
    }
    bytes.chunks(block_size.max(1)).collect()
}

/// Concatenates blocks back into one stream.
pub fn join<'a>(blocks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for block in blocks {
        out.extend_from_slice(block);
    }
    out
}

/// Returns block `index` of `bytes`, or `None` past the end.
pub fn block(bytes: &[u8], index: usize, block_size: usize) -> Option<&[u8]> {
    let block_size = block_size.max(1);
    if index >= block_count(bytes.len(), block_size) {
        return None;
    }
    let start = index * block_size;
    let end = (start + block_size).min(bytes.len());
    Some(&bytes[start..end])
}

/// Collects blocks of a stream of known length, in any order.
#[derive(Debug)]
pub struct BlockAssembler {
    buf: Vec<u8>,
    block_size: usize,
    received: Vec<bool>,
    missing: usize,
}

impl BlockAssembler {
    pub fn new(total_len: usize, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let blocks = block_count(total_len, block_size);
        Self {
            buf: vec![0; total_len],
            block_size,
            received: vec![false; blocks],
            missing: blocks,
        }
    }

    pub fn total_len(&self) -> usize {
        self.buf.len()
    }

    pub fn block_count(&self) -> usize {
        self.received.len()
    }

    /// Places `block` at offset `index * block_size`.
    ///
    /// Inserting the same block twice is allowed so that a retried prepare
    /// overwrites rather than fails.
    pub fn insert(&mut self, index: usize, block: &[u8]) -> Result<()> {
        let blocks = self.received.len();
        if index >= blocks {
            return Err(Error::BlockOutOfRange { index, blocks });
        }
        let start = index * self.block_size;
        let expected = (self.buf.len() - start).min(self.block_size);
        if block.len() != expected {
            return Err(Error::BlockLength { index, expected, actual: block.len() });
        }
        self.buf[start..start + expected].copy_from_slice(block);
        if !self.received[index] {
            self.received[index] = true;
            self.missing -= 1;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }

    /// Yields the reassembled stream once every block is in.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.missing > 0 {
            return Err(Error::Incomplete { missing: self.missing, blocks: self.received.len() });
        }
        Ok(self.buf)
    }
}
