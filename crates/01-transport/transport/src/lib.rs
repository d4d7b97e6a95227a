//! Core transport primitives for the host side of the split-MCU link.
//!
//! * [`BlockPool`] – fixed-size, DMA-aligned free-list allocator.
//! * [`BufferHandle`] – owned frame buffer that returns to its pool exactly once.
//! * [`EventGroup`] / [`BoundedQueue`] – the cross-thread signalling the engine needs.
//! * [`hal`] – collaborator traits a platform port implements.
//! * [`schema`] – wire constants shared with the peer firmware.
//! * [`TransportError`] – lightweight error surface for the above.

mod block_pool;
mod buffer;
mod error;
mod event_group;
pub mod hal;
mod queue;
mod region;
pub mod schema;
pub mod wait;

pub use block_pool::{align_up, Block, BlockPool, PoolStats, RejectedBlock, DMA_ALIGNMENT};
pub use buffer::BufferHandle;
pub use error::{TransportError, TransportResult};
pub use event_group::EventGroup;
pub use queue::BoundedQueue;
pub use region::DmaRegion;
pub use schema::*;
pub use wait::Wait;
