//! Atomic wait/notify shims and the waiting modes shared by queues and
//! event groups.
//!
//! Native targets park on the `atomic-wait` crate (futex-backed where
//! available). Loom builds stub parking with a cooperative yield so the model
//! scheduler can explore interleavings.

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicU32;
#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// How long a blocking primitive may wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Fail immediately when the condition is not met.
    NonBlocking,
    /// Wait until the condition is met.
    Forever,
    /// Wait at most this long.
    Timeout(Duration),
}

impl Wait {
    /// Maps the OS-layer convention: `0` non-blocking, negative forever,
    /// positive a number of seconds.
    pub fn from_secs(secs: i32) -> Self {
        match secs {
            0 => Wait::NonBlocking,
            s if s < 0 => Wait::Forever,
            s => Wait::Timeout(Duration::from_secs(s as u64)),
        }
    }
}

#[cfg(feature = "loom")]
mod imp {
    use super::AtomicU32;

    #[inline]
    pub(crate) fn wait_u32(atomic: &AtomicU32, expected: u32) {
        let _ = (atomic, expected);
        loom::thread::yield_now();
    }

    #[inline]
    pub(crate) fn wake_all(atomic: &AtomicU32) {
        let _ = atomic;
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    use super::AtomicU32;

    #[inline]
    pub(crate) fn wait_u32(atomic: &AtomicU32, expected: u32) {
        atomic_wait::wait(atomic, expected);
    }

    #[inline]
    pub(crate) fn wake_all(atomic: &AtomicU32) {
        atomic_wait::wake_all(atomic as *const AtomicU32);
    }
}

/// Parks the caller while `atomic` still holds `expected`.
///
/// Spurious wakeups are possible; callers re-check their condition.
#[inline]
pub fn wait_u32(atomic: &AtomicU32, expected: u32) {
    imp::wait_u32(atomic, expected)
}

/// Wakes every waiter parked on `atomic`.
#[inline]
pub fn wake_all(atomic: &AtomicU32) {
    imp::wake_all(atomic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_timeout_convention() {
        assert_eq!(Wait::from_secs(0), Wait::NonBlocking);
        assert_eq!(Wait::from_secs(-1), Wait::Forever);
        assert_eq!(Wait::from_secs(3), Wait::Timeout(Duration::from_secs(3)));
    }
}
