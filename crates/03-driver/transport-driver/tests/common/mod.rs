#![allow(dead_code)]

use runtime_native::{CaptureBus, NativePlatform, NativeTimers, PeerProfile, Submission};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use transport::{BusKind, ChipId, IfType};
use transport_driver::{Collaborators, LinkConfig, Transport, UpCallback};

pub struct Harness {
    pub transport: Transport,
    pub bus: Arc<CaptureBus>,
    pub platform: Arc<NativePlatform>,
    pub ups: Arc<AtomicU32>,
}

impl Harness {
    pub fn up_count(&self) -> u32 {
        self.ups.load(Ordering::SeqCst)
    }

    /// Cold boot without a reset line followed by the peer's announcement.
    pub fn bring_up(&self, chip: ChipId) {
        self.transport.reconfigure().expect("reconfigure");
        self.bus.announce(&PeerProfile::new(chip)).expect("announce");
        assert!(self.transport.is_tx_ready(), "handshake did not complete");
    }

    pub fn sent_on(&self, if_type: IfType) -> Vec<Submission> {
        self.bus
            .submissions()
            .into_iter()
            .filter(|sub| sub.if_type == if_type)
            .collect()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn quick_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.bring_up.reset_hold_ms = 0;
    config.bring_up.reset_settle_ms = 0;
    config.bring_up.poll_interval_ms = 1;
    config
}

/// Builds a transport over a capture bus. `platform` receives the bus so a
/// boot hook can answer resets.
pub fn harness_with(
    config: LinkConfig,
    platform: impl FnOnce(NativePlatform, Arc<CaptureBus>) -> NativePlatform,
) -> Harness {
    init_logging();
    let bus = Arc::new(CaptureBus::new(config.bus));
    let base = NativePlatform::new().on_restart(|_reason| {});
    let platform = Arc::new(platform(base, Arc::clone(&bus)));

    let ups = Arc::new(AtomicU32::new(0));
    let up_counter = Arc::clone(&ups);
    let up: UpCallback = Arc::new(move || {
        up_counter.fetch_add(1, Ordering::SeqCst);
    });

    let transport = Transport::setup(
        config,
        Collaborators {
            bus: bus.clone(),
            platform: platform.clone(),
            timers: Arc::new(NativeTimers::new()),
        },
        Some(up),
    )
    .expect("setup");

    Harness {
        transport,
        bus,
        platform,
        ups,
    }
}

pub fn harness(config: LinkConfig) -> Harness {
    harness_with(config, |platform, _bus| platform)
}

pub fn spi_config() -> LinkConfig {
    LinkConfig {
        bus: BusKind::Spi,
        ..quick_config()
    }
}
