//! Allocator properties: alignment, sizing, and steady-state reuse.

use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use transport::{BlockPool, BufferHandle, IfType, TransportError, DMA_ALIGNMENT};

proptest! {
    #[test]
    fn alloc_honours_size_and_alignment(block_size in 1usize..4096, nbytes_seed in any::<u16>()) {
        let pool = BlockPool::create(block_size).expect("create pool");
        prop_assert!(pool.block_size() >= block_size);
        prop_assert_eq!(pool.block_size() % DMA_ALIGNMENT, 0);

        let nbytes = nbytes_seed as usize % (pool.block_size() + 1);
        let block = pool.alloc(nbytes, false).expect("alloc within block size");
        prop_assert!(block.len() >= pool.block_size());
        prop_assert_eq!(block.addr() % DMA_ALIGNMENT, 0);
        pool.free(block).expect("free");
    }

    #[test]
    fn oversized_alloc_always_fails(block_size in 1usize..4096, extra in 1usize..512) {
        let pool = BlockPool::create(block_size).expect("create pool");
        let requested = pool.block_size() + extra;
        let err = pool.alloc(requested, true).unwrap_err();
        let is_too_large = matches!(err, TransportError::BlockTooLarge { .. });
        prop_assert!(is_too_large);
        prop_assert_eq!(pool.stats().num_fresh_alloc, 0);
    }
}

#[test]
fn fresh_allocations_stay_at_high_water_mark() {
    const HIGH_WATER: usize = 6;
    let pool = BlockPool::create(1600).expect("create pool");
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut live = Vec::new();

    for _ in 0..5_000 {
        let grow = live.len() < HIGH_WATER && (live.is_empty() || rng.gen_bool(0.5));
        if grow {
            live.push(pool.alloc(rng.gen_range(1..=1600), false).expect("alloc"));
        } else {
            let idx = rng.gen_range(0..live.len());
            pool.free(live.swap_remove(idx)).expect("free");
        }
    }
    for block in live.drain(..) {
        pool.free(block).expect("free");
    }

    let stats = pool.stats();
    assert!(stats.num_fresh_alloc as usize <= HIGH_WATER);
    assert!(stats.num_reuse > 0);
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.num_free, stats.num_fresh_alloc + stats.num_reuse);
}

#[test]
fn concurrent_handles_return_every_block() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 500;
    let pool = BlockPool::create(512).expect("create pool");

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let block = pool.alloc(64, true).expect("alloc");
                    let mut handle =
                        BufferHandle::from_pool(IfType::Sta, t as u8, Arc::clone(&pool), block, 0, 8);
                    handle.payload_mut().copy_from_slice(&(round as u64).to_le_bytes());
                    assert_eq!(handle.payload(), (round as u64).to_le_bytes());
                    handle.release();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let stats = pool.stats();
    assert_eq!(stats.live_blocks, 0);
    assert!(stats.num_fresh_alloc as usize <= THREADS);
    assert_eq!(stats.num_free as usize, THREADS * ROUNDS);
}
