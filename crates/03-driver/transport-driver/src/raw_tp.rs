//! Raw throughput test: periodic bandwidth reports and an optional host
//! traffic generator on the TEST interface.

use crate::config::RawThroughputConfig;
use crate::error::DriverResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use transport::hal::{TimerHandle, TimerKind, TimerService};
use transport::RAW_TP_ENABLED;

/// Word repeated through every generated test frame.
pub const RAW_TP_PATTERN: u32 = 0xBAAD_F00D;

/// Sends one generated frame; supplied by the engine.
pub(crate) type RawTpSend = Arc<dyn Fn(Vec<u8>) -> DriverResult<()> + Send + Sync>;

/// One reporting window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThroughputReport {
    pub from_s: u64,
    pub to_s: u64,
    pub tx_kbps: u64,
    pub rx_kbps: u64,
}

#[derive(Debug, Default)]
struct Counters {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    elapsed_s: AtomicU64,
}

impl Counters {
    fn report(&self, interval_s: u64) -> ThroughputReport {
        let kbps = |bytes: u64| (bytes * 8).checked_div(interval_s).unwrap_or(0) / 1024;
        let tx = self.tx_bytes.swap(0, Ordering::Relaxed);
        let rx = self.rx_bytes.swap(0, Ordering::Relaxed);
        let from_s = self.elapsed_s.fetch_add(interval_s, Ordering::Relaxed);
        let report = ThroughputReport {
            from_s,
            to_s: from_s + interval_s,
            tx_kbps: kbps(tx),
            rx_kbps: kbps(rx),
        };
        log::info!(
            "{}-{} sec Tx:{} Rx:{} Kbps",
            report.from_s,
            report.to_s,
            report.tx_kbps,
            report.rx_kbps
        );
        report
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub(crate) struct RawThroughput {
    config: RawThroughputConfig,
    counters: Arc<Counters>,
    timer: Mutex<Option<Box<dyn TimerHandle>>>,
    worker: Mutex<Option<Worker>>,
}

impl RawThroughput {
    pub(crate) fn new(config: RawThroughputConfig) -> Self {
        Self {
            config,
            counters: Arc::default(),
            timer: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Direction bits the host advertises in its handshake reply.
    pub(crate) fn host_bits(&self) -> u8 {
        if self.config.enabled {
            self.config.direction.bits()
        } else {
            0
        }
    }

    pub(crate) fn record_rx(&self, len: usize) {
        self.counters.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn report_now(&self) -> ThroughputReport {
        self.counters.report(self.config.report_interval_s)
    }

    /// Restarts the test for the peer's TEST_RAW_TP flags.
    pub(crate) fn start(
        &self,
        peer_flags: u8,
        timers: &dyn TimerService,
        send: RawTpSend,
    ) -> DriverResult<()> {
        let peer_enabled = peer_flags & RAW_TP_ENABLED != 0;
        if !self.config.enabled {
            if peer_enabled {
                log::warn!("peer enabled raw throughput testing, but host has it disabled");
            }
            return Ok(());
        }

        self.cleanup();
        if !peer_enabled {
            log::warn!("raw throughput testing not enabled on peer, stopping test");
            return Ok(());
        }
        log::info!(
            "raw throughput test {} (report every {} s)",
            self.config.direction.label(),
            self.config.report_interval_s
        );

        let interval_s = self.config.report_interval_s;
        let counters = Arc::clone(&self.counters);
        let timer = timers.start(
            Duration::from_secs(interval_s),
            TimerKind::Periodic,
            Box::new(move || {
                counters.report(interval_s);
            }),
        )?;
        *self.timer.lock() = Some(timer);

        if self.config.direction.host_sends() {
            *self.worker.lock() = Some(self.spawn_worker(send)?);
        }
        Ok(())
    }

    fn spawn_worker(&self, send: RawTpSend) -> DriverResult<Worker> {
        let stop = Arc::new(AtomicBool::new(false));
        let frame = pattern_frame(self.config.pkt_len);
        let counters = Arc::clone(&self.counters);
        let worker_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("raw-tp-tx".into())
            .spawn(move || {
                while !worker_stop.load(Ordering::Relaxed) {
                    let len = frame.len() as u64;
                    match send(frame.clone()) {
                        Ok(()) => {
                            counters.tx_bytes.fetch_add(len, Ordering::Relaxed);
                        }
                        Err(err) => {
                            log::debug!("raw tp tx failed: {err}");
                            thread::yield_now();
                        }
                    }
                }
            })
            .map_err(|_| transport::TransportError::Timer("failed to spawn raw tp worker"))?;
        Ok(Worker { stop, handle })
    }

    /// Stops the report timer and the traffic generator.
    pub(crate) fn cleanup(&self) {
        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Relaxed);
            if worker.handle.thread().id() != thread::current().id()
                && worker.handle.join().is_err()
            {
                log::warn!("raw tp worker panicked");
            }
        }
        self.counters.elapsed_s.store(0, Ordering::Relaxed);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }
}

impl Drop for RawThroughput {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Test frame of `len` bytes filled with [`RAW_TP_PATTERN`].
pub fn pattern_frame(len: usize) -> Vec<u8> {
    let word = RAW_TP_PATTERN.to_le_bytes();
    let mut frame = vec![0u8; len];
    for chunk in frame.chunks_mut(4) {
        chunk.copy_from_slice(&word[..chunk.len()]);
    }
    frame
}
