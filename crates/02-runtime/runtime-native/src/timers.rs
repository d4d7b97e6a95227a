//! Thread-per-timer software timers.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use transport::hal::{TimerCallback, TimerHandle, TimerKind, TimerService};
use transport::{TransportError, TransportResult};

/// [`TimerService`] backed by one sleeping thread per armed timer.
#[derive(Clone, Debug, Default)]
pub struct NativeTimers;

impl NativeTimers {
    /// Timer service spawning one thread per armed timer.
    pub fn new() -> Self {
        Self
    }
}

/// Handle to a timer thread. Dropping the handle stops the timer.
#[derive(Debug)]
pub struct NativeTimer {
    stop_tx: Option<Sender<()>>,
}

impl TimerHandle for NativeTimer {
    fn stop(&mut self) {
        // Disconnecting the channel wakes the timer thread and ends it.
        self.stop_tx.take();
    }
}

impl TimerService for NativeTimers {
    fn start(
        &self,
        period: Duration,
        kind: TimerKind,
        mut callback: TimerCallback,
    ) -> TransportResult<Box<dyn TimerHandle>> {
        if period.is_zero() {
            return Err(TransportError::Timer("zero timer period"));
        }
        let (stop_tx, stop_rx) = bounded::<()>(0);
        thread::Builder::new()
            .name("link-timer".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        callback();
                        if kind == TimerKind::OneShot {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|_| TransportError::Timer("failed to spawn timer thread"))?;

        Ok(Box::new(NativeTimer {
            stop_tx: Some(stop_tx),
        }))
    }
}
