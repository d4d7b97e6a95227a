//! Host-to-peer flow control for STA uplink traffic.
//!
//! The peer piggybacks throttle requests on the frames it sends. An `On`
//! request clears [`ALLOW_WIFI`], `Off` sets it again; the STA TX path then
//! consults the configured [`FlowPolicy`] before it copies anything.

use crate::config::{FlowControlConfig, FlowPolicy};
use std::time::{Duration, Instant};
use transport::{EventGroup, ThrottleCmd, Wait};

/// Set while the peer accepts Wi-Fi traffic.
pub const ALLOW_WIFI: u32 = 1 << 0;

/// Microseconds between two readings of a free-running 32-bit clock.
pub fn elapsed_us(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}

#[derive(Debug)]
pub struct FlowControl {
    events: EventGroup,
    policy: FlowPolicy,
    timeout: Duration,
    epoch: Instant,
}

impl FlowControl {
    pub fn new(config: &FlowControlConfig) -> Self {
        Self {
            events: EventGroup::new(ALLOW_WIFI),
            policy: config.policy,
            timeout: config.timeout(),
            epoch: Instant::now(),
        }
    }

    pub fn policy(&self) -> FlowPolicy {
        self.policy
    }

    /// Whether the peer currently accepts Wi-Fi traffic.
    pub fn is_open(&self) -> bool {
        self.events.bits() & ALLOW_WIFI != 0
    }

    pub fn pause(&self) {
        self.events.clear_bits(ALLOW_WIFI);
    }

    pub fn resume(&self) {
        self.events.set_bits(ALLOW_WIFI);
    }

    /// Applies a throttle request. Returns the request when it changed
    /// anything worth counting.
    pub fn apply(&self, cmd: ThrottleCmd) -> Option<ThrottleCmd> {
        match cmd {
            ThrottleCmd::NoChange => None,
            ThrottleCmd::On => {
                self.pause();
                log::debug!("flow control on: pausing wifi tx");
                Some(cmd)
            }
            ThrottleCmd::Off => {
                self.resume();
                log::debug!("flow control off: resuming wifi tx");
                Some(cmd)
            }
        }
    }

    /// Gate for one outbound STA frame. False means the frame must be dropped.
    pub fn admit(&self) -> bool {
        match self.policy {
            FlowPolicy::Off => true,
            FlowPolicy::Drop => self.is_open(),
            FlowPolicy::Block => self.events.wait_bits(ALLOW_WIFI, Wait::Forever) & ALLOW_WIFI != 0,
            FlowPolicy::BlockWithTimeout => self.admit_before_deadline(),
        }
    }

    fn admit_before_deadline(&self) -> bool {
        let timeout_us = u32::try_from(self.timeout.as_micros()).unwrap_or(u32::MAX);
        let start = self.now_us();
        loop {
            if self.is_open() {
                return true;
            }
            if elapsed_us(start, self.now_us()) >= timeout_us {
                return false;
            }
            std::thread::yield_now();
        }
    }

    fn now_us(&self) -> u32 {
        // Truncation mirrors a free-running 32-bit microsecond counter.
        self.epoch.elapsed().as_micros() as u32
    }
}
