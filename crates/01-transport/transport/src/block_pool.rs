//! Fixed-block-size free-list allocator for bus buffers.
//!
//! Every logical channel owns one pool sized to the largest frame its bus can
//! carry. Blocks are recycled through a LIFO free list guarded by a short
//! critical section; fresh blocks come from [`DmaRegion`] so every address
//! handed out honours [`DMA_ALIGNMENT`]. Blocks are stamped with the id of the
//! pool that created them and a misdirected [`BlockPool::free`] is refused.

use crate::region::DmaRegion;
use crate::{TransportError, TransportResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Alignment enforced for every block handed out by a pool.
pub const DMA_ALIGNMENT: usize = 64;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Rounds `len` up to the next [`DMA_ALIGNMENT`] boundary.
pub fn align_up(len: usize) -> Option<usize> {
    len.checked_next_multiple_of(DMA_ALIGNMENT)
}

/// Point-in-time copy of a pool's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Blocks obtained from the system allocator.
    pub num_fresh_alloc: u32,
    /// Blocks served from the free list.
    pub num_reuse: u32,
    /// Blocks returned through [`BlockPool::free`].
    pub num_free: u32,
    /// Blocks currently checked out.
    pub live_blocks: u32,
}

#[derive(Default)]
struct PoolMetrics {
    fresh_alloc: AtomicU32,
    reuse: AtomicU32,
    free: AtomicU32,
    live: AtomicU32,
}

impl PoolMetrics {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            num_fresh_alloc: self.fresh_alloc.load(Ordering::Relaxed),
            num_reuse: self.reuse.load(Ordering::Relaxed),
            num_free: self.free.load(Ordering::Relaxed),
            live_blocks: self.live.load(Ordering::Relaxed),
        }
    }
}

/// One block checked out of a [`BlockPool`].
#[derive(Debug)]
pub struct Block {
    pool_id: u32,
    region: DmaRegion,
}

impl Block {
    /// Id of the pool that allocated this block.
    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    /// Usable bytes in the block (the pool's aligned block size).
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Blocks are never empty; provided for clippy symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Start address of the block.
    pub fn addr(&self) -> usize {
        self.region.addr()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.region.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }
}

/// A block refused by [`BlockPool::free`], handed back to the caller.
///
/// The block stays checked out of its own pool until it is freed there.
#[derive(Debug)]
pub struct RejectedBlock {
    pub error: TransportError,
    pub block: Block,
}

impl RejectedBlock {
    pub fn into_block(self) -> Block {
        self.block
    }
}

impl fmt::Display for RejectedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RejectedBlock {}

struct FreeList {
    blocks: Vec<DmaRegion>,
    destroyed: bool,
}

/// Free-list allocator serving one fixed, aligned block size.
pub struct BlockPool {
    id: u32,
    block_size: usize,
    free_list: Mutex<FreeList>,
    metrics: PoolMetrics,
    destroyed: AtomicBool,
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("id", &self.id)
            .field("block_size", &self.block_size)
            .field("stats", &self.metrics.snapshot())
            .finish()
    }
}

impl BlockPool {
    /// Creates an empty pool whose blocks hold at least `block_size` bytes.
    ///
    /// The size is rounded up to [`DMA_ALIGNMENT`]. No memory is reserved until
    /// the first [`BlockPool::alloc`].
    pub fn create(block_size: usize) -> TransportResult<Arc<Self>> {
        if block_size == 0 {
            return Err(TransportError::InvalidCapacity {
                requested: 0,
                minimum: 1,
            });
        }
        let block_size = align_up(block_size).ok_or(TransportError::InvalidCapacity {
            requested: block_size,
            minimum: DMA_ALIGNMENT,
        })?;

        Ok(Arc::new(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            block_size,
            free_list: Mutex::new(FreeList {
                blocks: Vec::new(),
                destroyed: false,
            }),
            metrics: PoolMetrics::default(),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Unique id stamped into every block this pool hands out.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Aligned size of each block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Checks out a block able to hold `nbytes`.
    ///
    /// Reuses the most recently freed block when one is cached; otherwise the
    /// lock is dropped before asking the system allocator for a fresh block.
    /// Fresh blocks always arrive zeroed; `zero` only clears a reused block.
    pub fn alloc(&self, nbytes: usize, zero: bool) -> TransportResult<Block> {
        if nbytes > self.block_size {
            return Err(TransportError::BlockTooLarge {
                requested: nbytes,
                block_size: self.block_size,
            });
        }

        let cached = self.free_list.lock().blocks.pop();
        let region = match cached {
            Some(mut region) => {
                self.metrics.reuse.fetch_add(1, Ordering::Relaxed);
                if zero {
                    region.zero();
                }
                region
            }
            None => {
                let region = DmaRegion::new_aligned(self.block_size, DMA_ALIGNMENT)?;
                self.metrics.fresh_alloc.fetch_add(1, Ordering::Relaxed);
                region
            }
        };

        self.metrics.live.fetch_add(1, Ordering::Relaxed);
        Ok(Block {
            pool_id: self.id,
            region,
        })
    }

    /// Returns a block to the free list.
    ///
    /// Blocks stamped with another pool's id are refused and handed back
    /// untouched, so neither pool's counters move. After
    /// [`BlockPool::destroy`] returned blocks are released immediately
    /// instead of cached.
    pub fn free(&self, block: Block) -> Result<(), RejectedBlock> {
        if block.pool_id != self.id {
            return Err(RejectedBlock {
                error: TransportError::ForeignBlock {
                    block_pool: block.pool_id,
                    pool: self.id,
                },
                block,
            });
        }

        self.metrics.free.fetch_add(1, Ordering::Relaxed);
        self.metrics.live.fetch_sub(1, Ordering::Relaxed);

        let mut list = self.free_list.lock();
        if list.destroyed {
            drop(list);
            drop(block);
        } else {
            list.blocks.push(block.region);
        }
        Ok(())
    }

    /// Drains the free list back to the system allocator.
    ///
    /// Blocks still checked out stay valid; they are released as soon as their
    /// holder frees them.
    pub fn destroy(&self) -> PoolStats {
        let drained = {
            let mut list = self.free_list.lock();
            list.destroyed = true;
            std::mem::take(&mut list.blocks)
        };
        self.destroyed.store(true, Ordering::Release);
        drop(drained);
        self.metrics.snapshot()
    }

    /// Whether [`BlockPool::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        self.metrics.snapshot()
    }

    /// Blocks currently checked out.
    pub fn live_blocks(&self) -> u32 {
        self.metrics.live.load(Ordering::Relaxed)
    }

    /// Blocks parked on the free list.
    pub fn cached_blocks(&self) -> usize {
        self.free_list.lock().blocks.len()
    }
}
