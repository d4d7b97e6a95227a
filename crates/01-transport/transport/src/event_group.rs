//! Multi-bit event group: cross-thread set/clear with blocking waits.

use crate::wait::{self, Wait};
#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU32, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Thirty-two independent event bits.
#[derive(Debug)]
pub struct EventGroup {
    bits: AtomicU32,
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventGroup {
    pub fn new(initial: u32) -> Self {
        Self {
            bits: AtomicU32::new(initial),
        }
    }

    /// Current bits.
    pub fn bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Sets `mask` and wakes every waiter. Returns the bits after the update.
    pub fn set_bits(&self, mask: u32) -> u32 {
        let prev = self.bits.fetch_or(mask, Ordering::AcqRel);
        wait::wake_all(&self.bits);
        prev | mask
    }

    /// Clears `mask`. Returns the bits after the update.
    pub fn clear_bits(&self, mask: u32) -> u32 {
        let prev = self.bits.fetch_and(!mask, Ordering::AcqRel);
        prev & !mask
    }

    /// Waits until every bit in `mask` is set.
    ///
    /// Returns the bits observed last; callers compare against `mask` to tell
    /// success from timeout. Bits are never consumed by the wait.
    pub fn wait_bits(&self, mask: u32, wait: Wait) -> u32 {
        match wait {
            Wait::NonBlocking => self.bits(),
            Wait::Forever => loop {
                let current = self.bits();
                if current & mask == mask {
                    return current;
                }
                wait::wait_u32(&self.bits, current);
            },
            Wait::Timeout(limit) => {
                let start = Instant::now();
                loop {
                    let current = self.bits();
                    if current & mask == mask || start.elapsed() >= limit {
                        return current;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}
