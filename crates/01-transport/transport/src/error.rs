//! Error handling helpers for the transport crate.
//!
//! The transport layer keeps its error surface small: pool sizing and
//! allocation failures, ownership violations, queue outcomes, and opaque
//! failures reported by the bus and timer collaborators. The driver crate
//! wraps these into its own richer error type.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by low-level transport helpers.
pub enum TransportError {
    /// Requested block size or queue depth is below the minimum.
    InvalidCapacity { requested: usize, minimum: usize },
    /// Allocation of an aligned region failed for the given size/alignment pair.
    AllocationFailed { size: usize, alignment: usize },
    /// Caller asked a pool for more bytes than one block holds.
    BlockTooLarge { requested: usize, block_size: usize },
    /// A block was handed back to a pool that did not allocate it.
    ForeignBlock { block_pool: u32, pool: u32 },
    /// Raw interface number does not map to a known logical interface.
    UnknownInterface(u8),
    /// Bounded queue had no room and the caller did not want to wait.
    QueueFull,
    /// Bounded queue had nothing to hand out and the caller did not want to wait.
    QueueEmpty,
    /// A bounded wait elapsed before the condition was met.
    TimedOut,
    /// The other side of a queue went away.
    Disconnected,
    /// The bus collaborator rejected an operation.
    Bus(String),
    /// The timer collaborator could not arm a timer.
    Timer(&'static str),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidCapacity { requested, minimum } => {
                write!(f, "capacity {requested} must be at least {minimum}")
            }
            TransportError::AllocationFailed { size, alignment } => {
                write!(
                    f,
                    "failed to allocate region of {size} bytes aligned to {alignment}"
                )
            }
            TransportError::BlockTooLarge {
                requested,
                block_size,
            } => {
                write!(
                    f,
                    "requested {requested} bytes from a pool of {block_size}-byte blocks"
                )
            }
            TransportError::ForeignBlock { block_pool, pool } => {
                write!(
                    f,
                    "block from pool {block_pool} returned to pool {pool}"
                )
            }
            TransportError::UnknownInterface(raw) => write!(f, "unknown interface type {raw}"),
            TransportError::QueueFull => f.write_str("queue full"),
            TransportError::QueueEmpty => f.write_str("queue empty"),
            TransportError::TimedOut => f.write_str("wait timed out"),
            TransportError::Disconnected => f.write_str("queue disconnected"),
            TransportError::Bus(reason) => write!(f, "bus failure: {reason}"),
            TransportError::Timer(reason) => write!(f, "timer failure: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}
