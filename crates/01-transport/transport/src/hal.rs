//! Interfaces the link layer consumes from its platform port.
//!
//! A host port supplies one [`BusDriver`] (SPI or SDIO plumbing), one
//! [`Platform`] (reset GPIO, sleeping, wake cause, restart) and one
//! [`TimerService`]. Native std-thread implementations live in
//! `runtime-native`.

use crate::buffer::BufferHandle;
use crate::schema::TxPriority;
use crate::TransportResult;
use std::sync::Arc;
use std::time::Duration;

/// Receives raw frames (header included) read off the bus.
pub type FrameSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback run when a software timer expires.
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// Physical transfer layer underneath the transport engine.
pub trait BusDriver: Send + Sync {
    /// Brings the bus up; inbound frames are pushed into `sink` from the bus
    /// thread until [`BusDriver::deinit`].
    fn init(&self, sink: FrameSink) -> TransportResult<()>;

    /// Stops the bus and drops the sink.
    fn deinit(&self);

    /// Queues one outbound buffer. Ownership passes to the bus, which releases
    /// the buffer once the transfer is done or has failed.
    fn submit(&self, buf: BufferHandle, priority: TxPriority) -> TransportResult<()>;
}

/// Level driven onto the peer's reset/enable GPIO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetLevel {
    /// Peer enabled and running.
    Run,
    /// Peer held in reset.
    Hold,
}

/// Why the host is running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WakeReason {
    #[default]
    ColdBoot,
    DeepSleep,
}

/// Board services outside the bus itself.
pub trait Platform: Send + Sync {
    /// Whether a GPIO is wired to the peer's reset/enable pin.
    fn has_reset_line(&self) -> bool;

    /// Drives the reset GPIO. Ignored when there is no reset line.
    fn set_reset_line(&self, level: ResetLevel);

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn wake_reason(&self) -> WakeReason;

    /// Restarts the host after an unrecoverable bring-up failure.
    fn restart(&self, reason: &str);
}

/// Whether a timer fires once or keeps firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Periodic,
}

/// Armed timer. Stopping is idempotent and safe after the timer fired.
pub trait TimerHandle: Send {
    fn stop(&mut self);
}

/// Software timers with callback delivery on a timer thread.
pub trait TimerService: Send + Sync {
    fn start(
        &self,
        period: Duration,
        kind: TimerKind,
        callback: TimerCallback,
    ) -> TransportResult<Box<dyn TimerHandle>>;
}
