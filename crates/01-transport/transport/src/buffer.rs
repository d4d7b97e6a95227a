//! Owned frame buffers travelling between the bus layer and upper layers.
//!
//! A [`BufferHandle`] owns its storage outright. Pool-backed handles return
//! their block to the originating [`BlockPool`] exactly once, when the handle
//! is released or dropped; moving the handle moves that obligation with it.

use crate::block_pool::{Block, BlockPool};
use crate::schema::IfType;
use std::fmt;
use std::sync::Arc;

enum Storage {
    /// Block borrowed from a pool; handed to the bus without another copy.
    Pooled { pool: Arc<BlockPool>, block: Block },
    /// Plain heap buffer released by the global allocator.
    Owned(Vec<u8>),
}

/// Unit of ownership passed along the TX and RX pipelines.
pub struct BufferHandle {
    if_type: IfType,
    if_num: u8,
    flags: u8,
    pkt_type: u8,
    seq_num: u16,
    offset: usize,
    len: usize,
    storage: Option<Storage>,
}

impl BufferHandle {
    /// Wraps a pool block whose payload sits at `offset..offset + len`.
    ///
    /// # Panics
    ///
    /// Panics if `block` was not allocated by `pool` or if the payload range
    /// does not fit inside the block.
    pub fn from_pool(
        if_type: IfType,
        if_num: u8,
        pool: Arc<BlockPool>,
        block: Block,
        offset: usize,
        len: usize,
    ) -> Self {
        assert_eq!(
            block.pool_id(),
            pool.id(),
            "block belongs to pool {}, not {}",
            block.pool_id(),
            pool.id()
        );
        assert!(
            offset + len <= block.len(),
            "payload {offset}+{len} exceeds block of {}",
            block.len()
        );
        Self {
            if_type,
            if_num,
            flags: 0,
            pkt_type: 0,
            seq_num: 0,
            offset,
            len,
            storage: Some(Storage::Pooled { pool, block }),
        }
    }

    /// Wraps a heap buffer; the whole vector is the payload.
    pub fn from_vec(if_type: IfType, if_num: u8, data: Vec<u8>) -> Self {
        Self {
            if_type,
            if_num,
            flags: 0,
            pkt_type: 0,
            seq_num: 0,
            offset: 0,
            len: data.len(),
            storage: Some(Storage::Owned(data)),
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_pkt_type(mut self, pkt_type: u8) -> Self {
        self.pkt_type = pkt_type;
        self
    }

    pub fn with_seq_num(mut self, seq_num: u16) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn if_type(&self) -> IfType {
        self.if_type
    }

    pub fn if_num(&self) -> u8 {
        self.if_num
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn pkt_type(&self) -> u8 {
        self.pkt_type
    }

    pub fn seq_num(&self) -> u16 {
        self.seq_num
    }

    /// Offset of the payload inside the backing storage (header headroom).
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the storage is a pool block the bus may transmit in place.
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.storage, Some(Storage::Pooled { .. }))
    }

    /// Pool id of the backing block, if pool-backed.
    pub fn pool_id(&self) -> Option<u32> {
        match &self.storage {
            Some(Storage::Pooled { block, .. }) => Some(block.pool_id()),
            _ => None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.storage_slice()[self.offset..self.offset + self.len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let range = self.offset..self.offset + self.len;
        &mut self.storage_slice_mut()[range]
    }

    /// Whole backing storage, headroom included.
    pub fn frame(&self) -> &[u8] {
        self.storage_slice()
    }

    /// Mutable backing storage so the bus layer can write the header in place.
    pub fn frame_mut(&mut self) -> &mut [u8] {
        self.storage_slice_mut()
    }

    /// Consumes the handle and gives its storage back to its owner.
    pub fn release(mut self) {
        self.release_storage();
    }

    /// Moves the payload bytes out, releasing the storage.
    pub fn into_vec(mut self) -> Vec<u8> {
        match self.storage.take() {
            Some(Storage::Owned(mut data)) if self.offset == 0 => {
                data.truncate(self.len);
                data
            }
            other => {
                self.storage = other;
                let data = self.payload().to_vec();
                self.release_storage();
                data
            }
        }
    }

    fn storage_slice(&self) -> &[u8] {
        match &self.storage {
            Some(Storage::Pooled { block, .. }) => block.as_slice(),
            Some(Storage::Owned(data)) => data.as_slice(),
            None => &[],
        }
    }

    fn storage_slice_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Some(Storage::Pooled { block, .. }) => block.as_mut_slice(),
            Some(Storage::Owned(data)) => data.as_mut_slice(),
            None => &mut [],
        }
    }

    fn release_storage(&mut self) {
        if let Some(Storage::Pooled { pool, block }) = self.storage.take() {
            // `from_pool` pairs every block with its owner.
            let returned = pool.free(block);
            debug_assert!(returned.is_ok(), "block returned to foreign pool");
        }
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.release_storage();
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("if_type", &self.if_type)
            .field("if_num", &self.if_num)
            .field("flags", &self.flags)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("zero_copy", &self.is_zero_copy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PAYLOAD_HEADER_LEN;

    #[test]
    fn pooled_handle_returns_block_once_on_drop() {
        let pool = BlockPool::create(256).expect("pool");
        let block = pool.alloc(256, true).expect("alloc");
        let mut handle =
            BufferHandle::from_pool(IfType::Sta, 0, Arc::clone(&pool), block, PAYLOAD_HEADER_LEN, 4);
        handle.payload_mut().copy_from_slice(b"ping");
        assert!(handle.is_zero_copy());
        assert_eq!(handle.payload(), b"ping");
        assert_eq!(&handle.frame()[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + 4], b"ping");
        assert_eq!(pool.live_blocks(), 1);

        let moved = handle;
        drop(moved);
        assert_eq!(pool.live_blocks(), 0);
        assert_eq!(pool.stats().num_free, 1);
    }

    #[test]
    fn into_vec_copies_out_of_pool_and_frees() {
        let pool = BlockPool::create(64).expect("pool");
        let mut block = pool.alloc(64, true).expect("alloc");
        block.as_mut_slice()[2..5].copy_from_slice(b"abc");
        let handle = BufferHandle::from_pool(IfType::Ap, 1, Arc::clone(&pool), block, 2, 3);
        assert_eq!(handle.into_vec(), b"abc");
        assert_eq!(pool.live_blocks(), 0);
    }

    #[test]
    #[should_panic(expected = "block belongs to pool")]
    fn pooled_handle_refuses_block_from_another_pool() {
        let owner = BlockPool::create(64).expect("pool");
        let other = BlockPool::create(64).expect("pool");
        let block = owner.alloc(8, false).expect("alloc");
        let _ = BufferHandle::from_pool(IfType::Sta, 0, other, block, 0, 8);
    }

    #[test]
    fn owned_handle_is_not_zero_copy() {
        let handle = BufferHandle::from_vec(IfType::Serial, 0, vec![1, 2, 3])
            .with_flags(crate::schema::FLAG_MORE_FRAGMENT)
            .with_seq_num(9);
        assert!(!handle.is_zero_copy());
        assert_eq!(handle.pool_id(), None);
        assert_eq!(handle.seq_num(), 9);
        assert_eq!(handle.into_vec(), vec![1, 2, 3]);
    }
}
