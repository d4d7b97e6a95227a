//! Host platform backed by std: reset line recording and restart hooks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transport::hal::{Platform, ResetLevel, WakeReason};

type Hook = Arc<dyn Fn() + Send + Sync>;
type RestartHook = Arc<dyn Fn(&str) + Send + Sync>;

/// [`Platform`] for desktop hosts and tests.
///
/// The reset line is virtual: every level driven onto it is recorded, and the
/// optional boot hook runs whenever the line is released from reset, which is
/// when a real peer would start booting.
pub struct NativePlatform {
    reset_line: bool,
    wake_reason: WakeReason,
    levels: Mutex<Vec<ResetLevel>>,
    on_peer_boot: Option<Hook>,
    on_restart: Option<RestartHook>,
    restarts: AtomicU32,
    sleep_scale: u32,
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePlatform {
    /// Platform without a reset line, cold-booted.
    pub fn new() -> Self {
        Self {
            reset_line: false,
            wake_reason: WakeReason::ColdBoot,
            levels: Mutex::new(Vec::new()),
            on_peer_boot: None,
            on_restart: None,
            restarts: AtomicU32::new(0),
            sleep_scale: 1,
        }
    }

    /// Wires a reset line to the peer.
    pub fn with_reset_line(mut self) -> Self {
        self.reset_line = true;
        self
    }

    /// Overrides the reported wake reason.
    pub fn with_wake_reason(mut self, reason: WakeReason) -> Self {
        self.wake_reason = reason;
        self
    }

    /// Divides every requested sleep by `scale`, so reset pulses in tests do
    /// not take real seconds.
    pub fn with_sleep_scale(mut self, scale: u32) -> Self {
        self.sleep_scale = scale.max(1);
        self
    }

    /// Runs `hook` each time the reset line goes from hold to run.
    pub fn on_peer_boot(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_peer_boot = Some(Arc::new(hook));
        self
    }

    /// Runs `hook` instead of exiting when a restart is requested.
    pub fn on_restart(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_restart = Some(Arc::new(hook));
        self
    }

    /// Levels driven onto the reset line so far, oldest first.
    pub fn reset_levels(&self) -> Vec<ResetLevel> {
        self.levels.lock().clone()
    }

    /// Number of hold-to-run edges seen on the reset line.
    pub fn reset_pulses(&self) -> usize {
        self.levels
            .lock()
            .windows(2)
            .filter(|w| w[0] == ResetLevel::Hold && w[1] == ResetLevel::Run)
            .count()
    }

    /// Number of restart requests received.
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl Platform for NativePlatform {
    fn has_reset_line(&self) -> bool {
        self.reset_line
    }

    fn set_reset_line(&self, level: ResetLevel) {
        if !self.reset_line {
            return;
        }
        let released = {
            let mut levels = self.levels.lock();
            let released = levels.last() == Some(&ResetLevel::Hold) && level == ResetLevel::Run;
            levels.push(level);
            released
        };
        log::trace!("reset line -> {level:?}");
        if released {
            if let Some(hook) = &self.on_peer_boot {
                hook();
            }
        }
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration / self.sleep_scale);
    }

    fn wake_reason(&self) -> WakeReason {
        self.wake_reason
    }

    fn restart(&self, reason: &str) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        log::error!("host restart requested: {reason}");
        match &self.on_restart {
            Some(hook) => hook(reason),
            None => std::process::exit(1),
        }
    }
}
