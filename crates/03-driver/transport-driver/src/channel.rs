//! Per-interface channel records and the fixed channel table.

use crate::error::DriverResult;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use transport::{BlockPool, BufferHandle, IfType, PoolStats};

/// Upper-layer receive entry point of a channel.
pub type RxFn = Arc<dyn Fn(BufferHandle) + Send + Sync>;

/// Bound transmit entry point handed back by `add_channel`.
pub type TxFn = Arc<dyn Fn(&[u8]) -> DriverResult<()> + Send + Sync>;

/// One registered logical interface and the pool its TX path draws from.
pub struct Channel {
    if_type: IfType,
    secure: bool,
    rx: RxFn,
    pool: Arc<BlockPool>,
}

impl Channel {
    pub(crate) fn new(if_type: IfType, secure: bool, rx: RxFn, pool: Arc<BlockPool>) -> Self {
        Self {
            if_type,
            secure,
            rx,
            pool,
        }
    }

    pub fn if_type(&self) -> IfType {
        self.if_type
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub(crate) fn deliver(&self, buf: BufferHandle) {
        (self.rx)(buf)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("if_type", &self.if_type)
            .field("secure", &self.secure)
            .field("pool", &self.pool.id())
            .finish_non_exhaustive()
    }
}

/// Channel slots indexed by interface type.
#[derive(Debug, Default)]
pub(crate) struct ChannelTable {
    slots: Mutex<[Option<Arc<Channel>>; IfType::COUNT]>,
}

impl ChannelTable {
    /// Installs `channel`, returning whatever it replaced.
    pub(crate) fn insert(&self, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        let index = channel.if_type.index();
        self.slots.lock()[index].replace(channel)
    }

    pub(crate) fn get(&self, if_type: IfType) -> Option<Arc<Channel>> {
        self.slots.lock()[if_type.index()].clone()
    }

    pub(crate) fn is_current(&self, channel: &Arc<Channel>) -> bool {
        self.slots.lock()[channel.if_type.index()]
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, channel))
    }

    /// Clears the slot only if it still holds `channel`.
    pub(crate) fn remove_if_current(&self, channel: &Arc<Channel>) -> bool {
        let mut slots = self.slots.lock();
        let slot = &mut slots[channel.if_type.index()];
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, channel)) {
            slot.take();
            true
        } else {
            false
        }
    }
}
