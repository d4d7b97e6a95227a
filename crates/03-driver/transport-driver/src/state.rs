//! Link bring-up state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Ordered link states; readiness checks are threshold comparisons.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportState {
    Inactive = 0,
    /// Bus is up; frames from the peer are accepted.
    RxActive = 1,
    /// Handshake done; the host may transmit.
    TxActive = 2,
}

impl TransportState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TransportState::Inactive,
            1 => TransportState::RxActive,
            _ => TransportState::TxActive,
        }
    }
}

/// Process-wide state, only ever moved forward except by [`StateCell::reset`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TransportState::Inactive as u8))
    }

    pub(crate) fn load(&self) -> TransportState {
        TransportState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Raises the state to `to`. Returns true when this call made the
    /// transition, false when the state was already at or past `to`.
    pub(crate) fn advance(&self, to: TransportState) -> bool {
        let prev = self.0.fetch_max(to as u8, Ordering::AcqRel);
        prev < to as u8
    }

    pub(crate) fn reset(&self) {
        self.0.store(TransportState::Inactive as u8, Ordering::Release);
    }
}
