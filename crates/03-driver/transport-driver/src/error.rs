//! Driver error type and its coarse OK/FAIL/INVALID classification.

use thiserror::Error;
use transport::{ChipId, IfType, TransportError};
use transport_codecs::CodecError;

pub type DriverResult<T, E = DriverError> = Result<T, E>;

/// Coarse outcome class handed to callers that only speak OK/FAIL/INVALID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generic failure; the operation may succeed later.
    Fail,
    /// The caller passed something the link cannot accept.
    Invalid,
    /// A pool, queue or the peer ran out of room.
    NoMem,
    /// The peer runs firmware this host must not talk to.
    Incompatible,
    /// Bring-up gave up; the embedding should restart the host.
    Fatal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no channel implementation for interface {0}")]
    UnsupportedInterface(IfType),
    #[error("no channel registered for interface {0}")]
    NotRegistered(IfType),
    #[error("channel handle for interface {0} is no longer registered")]
    StaleChannel(IfType),
    #[error("identified peer [{found}] != expected [{expected}]")]
    ChipMismatch { expected: ChipId, found: ChipId },
    #[error("peer reported unsupported chip id {0:#04x}")]
    UnsupportedChip(u8),
    #[error("init event of {len} bytes exceeds {max}")]
    InitEventTooLong { len: usize, max: usize },
    #[error("tx dropped by flow control")]
    FlowControlDrop,
    #[error("transport not ready")]
    TransportNotReady,
    #[error("payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("empty payload")]
    EmptyPayload,
    #[error("peer transport not up after {retries} polls")]
    BringUpFailed { retries: u32 },
    #[error("all {0} serial connections in use")]
    SerialLimit(usize),
    #[error("serial connection {0} is not active")]
    SerialNotActive(u8),
    #[error("serial message exceeds {max} bytes")]
    MessageTooLarge { max: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Transport(err) => match err {
                TransportError::AllocationFailed { .. } | TransportError::QueueFull => {
                    ErrorKind::NoMem
                }
                TransportError::InvalidCapacity { .. }
                | TransportError::BlockTooLarge { .. }
                | TransportError::ForeignBlock { .. }
                | TransportError::UnknownInterface(_) => ErrorKind::Invalid,
                _ => ErrorKind::Fail,
            },
            DriverError::Codec(_)
            | DriverError::UnsupportedInterface(_)
            | DriverError::NotRegistered(_)
            | DriverError::StaleChannel(_)
            | DriverError::PayloadTooLarge { .. }
            | DriverError::EmptyPayload
            | DriverError::MessageTooLarge { .. }
            | DriverError::InvalidConfig(_) => ErrorKind::Invalid,
            DriverError::ChipMismatch { .. }
            | DriverError::UnsupportedChip(_)
            | DriverError::InitEventTooLong { .. } => ErrorKind::Incompatible,
            DriverError::FlowControlDrop | DriverError::SerialLimit(_) => ErrorKind::NoMem,
            DriverError::BringUpFailed { .. } => ErrorKind::Fatal,
            DriverError::TransportNotReady | DriverError::SerialNotActive(_) => ErrorKind::Fail,
        }
    }
}
