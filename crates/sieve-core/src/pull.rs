//! Block column store.
//!
//! A [`Pull`] is a sparse, growable array of values split into fixed-size
//! blocks. A 32-bit logical index addresses `(block, offset)`; blocks are
//! allocated only when written. Reads of unwritten positions return
//! `T::default()`, so the store behaves as if it were infinite.

use crate::config::Config;
use crate::error::{Result, SieveError};
use tracing::trace;

/// Block size used when none is given.
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

/// Sparse chunked column of `T`.
///
/// ```rust
/// use sieve_core::Pull;
///
/// let mut pull = Pull::<i64>::with_block_size(4).unwrap();
/// pull.set(6, 42);
/// assert_eq!(pull.get(6), 42);
/// assert_eq!(pull.get(3), 0);
/// assert_eq!(pull.capacity(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct Pull<T> {
    blocks: Vec<Option<Box<[T]>>>,
    block_size: u32,
    /// One past the highest written index.
    len: u32,
    written: bool,
}

impl<T: Clone + Default> Default for Pull<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> Pull<T> {
    pub fn new() -> Self {
        Pull {
            blocks: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            len: 0,
            written: false,
        }
    }

    pub fn with_block_size(block_size: u32) -> Result<Self> {
        let mut pull = Self::new();
        pull.set_block_size(block_size)?;
        Ok(pull)
    }

    /// An empty column with the block size from `[pull]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_block_size(config.pull.block_size)
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Change the block size. Only allowed before the first write.
    pub fn set_block_size(&mut self, block_size: u32) -> Result<()> {
        if block_size == 0 {
            return Err(SieveError::InvalidBlockSize { size: block_size });
        }
        if self.written && block_size != self.block_size {
            return Err(SieveError::BlockSizeLocked {
                current: self.block_size,
            });
        }
        self.block_size = block_size;
        Ok(())
    }

    fn locate(&self, index: u32) -> (usize, usize) {
        (
            (index / self.block_size) as usize,
            (index % self.block_size) as usize,
        )
    }

    /// Value at `index`, `T::default()` if never written.
    pub fn get(&self, index: u32) -> T {
        let (block, offset) = self.locate(index);
        match self.blocks.get(block) {
            Some(Some(values)) => values[offset].clone(),
            _ => T::default(),
        }
    }

    /// Write `value` at `index`, allocating its block if needed.
    pub fn set(&mut self, index: u32, value: T) {
        let (block, offset) = self.locate(index);
        if block >= self.blocks.len() {
            self.blocks.resize_with(block + 1, || None);
        }
        let block_size = self.block_size as usize;
        let values = self.blocks[block].get_or_insert_with(|| {
            trace!(block, block_size, "Allocating block");
            vec![T::default(); block_size].into_boxed_slice()
        });
        values[offset] = value;
        self.written = true;
        self.len = self.len.max(index.saturating_add(1));
    }

    /// Drop everything after `max_index`.
    ///
    /// Blocks past the one holding `max_index` are released; the tail of that
    /// block is reset to `T::default()`.
    pub fn trunc(&mut self, max_index: u32) {
        let (block, offset) = self.locate(max_index);
        self.blocks.truncate(block + 1);
        if let Some(Some(values)) = self.blocks.get_mut(block) {
            for value in values.iter_mut().skip(offset + 1) {
                *value = T::default();
            }
        }
        self.len = self.len.min(max_index.saturating_add(1));
    }

    /// Release every block. The block size may be changed again afterwards.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
        self.written = false;
    }

    /// Number of addressable positions in the block range.
    pub fn capacity(&self) -> usize {
        self.blocks.len() * self.block_size as usize
    }

    /// One past the highest written index.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the block range, allocated or not.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn allocated_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Values from `0` to `len() - 1`.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |index| self.get(index))
    }
}
