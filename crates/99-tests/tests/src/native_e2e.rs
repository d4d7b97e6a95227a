#![cfg(all(test, not(target_arch = "wasm32")))]

use parking_lot::Mutex;
use runtime_native::{CaptureBus, NativePlatform, NativeTimers, PeerProfile};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use transport::{BufferHandle, ChipId, IfType, ThrottleCmd};
use transport_codecs::PayloadHeader;
use transport_driver::{
    Collaborators, FlowPolicy, LinkConfig, RxFn, Transport, TransportState, UpCallback,
};

const SENDERS: usize = 4;
const PACKETS_PER_SENDER: usize = 200;

struct Link {
    transport: Transport,
    bus: Arc<CaptureBus>,
    platform: Arc<NativePlatform>,
    ups: Arc<AtomicU32>,
}

fn link(
    config: LinkConfig,
    platform: impl FnOnce(NativePlatform, Arc<CaptureBus>) -> NativePlatform,
) -> Link {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = Arc::new(CaptureBus::new(config.bus));
    let platform = Arc::new(platform(
        NativePlatform::new().on_restart(|reason| log::warn!("restart requested: {reason}")),
        Arc::clone(&bus),
    ));
    let ups = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ups);
    let up: UpCallback = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
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
    Link {
        transport,
        bus,
        platform,
        ups,
    }
}

fn throttle(cmd: ThrottleCmd) -> PayloadHeader {
    let mut header = PayloadHeader::new(IfType::Sta, 0, 0);
    header.throttle = cmd;
    header
}

fn blocking_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.flow_control.policy = FlowPolicy::Block;
    config
}

#[test]
fn concurrent_senders_survive_peer_throttling() {
    let link = link(blocking_config(), |platform, _bus| platform);
    link.transport.reconfigure().expect("reconfigure");
    link.bus
        .announce(&PeerProfile::new(ChipId::Esp32))
        .expect("announce");
    assert_eq!(link.transport.state(), TransportState::TxActive);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let rx: RxFn = Arc::new(move |buf: BufferHandle| {
        sink.lock().push(buf.into_vec());
    });
    let (channel, tx) = link
        .transport
        .add_channel(IfType::Sta, false, rx)
        .expect("sta channel");

    let senders: Vec<_> = (0..SENDERS)
        .map(|sender| {
            let tx = Arc::clone(&tx);
            thread::spawn(move || {
                for seq in 0..PACKETS_PER_SENDER {
                    let mut payload = vec![sender as u8; 64];
                    payload[1..3].copy_from_slice(&(seq as u16).to_le_bytes());
                    tx(&payload).expect("blocking policy never drops");
                }
            })
        })
        .collect();

    // The peer echoes every frame and throttles the host now and then.
    let total = SENDERS * PACKETS_PER_SENDER;
    let mut echoed = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while echoed < total {
        assert!(Instant::now() < deadline, "echoed only {echoed} of {total}");
        let batch = link.bus.take_submissions();
        if batch.is_empty() {
            thread::yield_now();
            continue;
        }
        for sub in batch.iter().filter(|sub| sub.if_type == IfType::Sta) {
            link.bus
                .inject(&PayloadHeader::new(IfType::Sta, 0, sub.len as u16), sub.payload())
                .expect("echo");
            echoed += 1;
            if echoed % 100 == 0 {
                link.bus.inject(&throttle(ThrottleCmd::On), &[]).expect("on");
                thread::sleep(Duration::from_millis(2));
                link.bus.inject(&throttle(ThrottleCmd::Off), &[]).expect("off");
            }
        }
    }
    for sender in senders {
        sender.join().expect("sender thread");
    }

    let received = received.lock();
    assert_eq!(received.len(), total);
    for sender in 0..SENDERS as u8 {
        let seqs: Vec<u16> = received
            .iter()
            .filter(|payload| payload[0] == sender)
            .map(|payload| u16::from_le_bytes([payload[1], payload[2]]))
            .collect();
        assert_eq!(seqs, (0..PACKETS_PER_SENDER as u16).collect::<Vec<_>>());
    }

    let stats = link.transport.packet_stats();
    assert_eq!(stats.sta_tx_out as usize, total);
    assert_eq!(stats.sta_rx_out as usize, total);
    assert_eq!(stats.sta_tx_flowctrl_drop, 0);
    assert_eq!(stats.sta_flow_ctrl_on, stats.sta_flow_ctrl_off);
    assert!(stats.sta_flow_ctrl_on >= 1);

    let pool = link.transport.remove_channel(&channel).expect("remove");
    assert_eq!(pool.live_blocks, 0);
    assert!(pool.num_reuse > 0, "blocks should be recycled: {pool:?}");
}

#[test]
fn blocked_sender_resumes_when_peer_clears_throttle() {
    let link = link(blocking_config(), |platform, _bus| platform);
    link.transport.reconfigure().expect("reconfigure");
    link.bus
        .announce(&PeerProfile::new(ChipId::Esp32))
        .expect("announce");
    let (_channel, tx) = link
        .transport
        .add_channel(IfType::Sta, false, Arc::new(|_buf: BufferHandle| {}))
        .expect("sta channel");

    link.bus.inject(&throttle(ThrottleCmd::On), &[]).expect("on");
    let sender = thread::spawn(move || tx(b"waiting"));
    thread::sleep(Duration::from_millis(30));
    let sta_frames = |link: &Link| {
        link.bus
            .submissions()
            .iter()
            .filter(|sub| sub.if_type == IfType::Sta)
            .count()
    };
    assert_eq!(sta_frames(&link), 0);

    link.bus.inject(&throttle(ThrottleCmd::Off), &[]).expect("off");
    sender.join().expect("sender").expect("sent after resume");
    assert_eq!(sta_frames(&link), 1);
}

#[test]
fn late_booting_peer_is_found_by_polling() {
    let mut config = LinkConfig::default();
    config.bring_up.reset_hold_ms = 0;
    config.bring_up.reset_settle_ms = 0;
    config.bring_up.poll_interval_ms = 5;
    config.bring_up.max_retry = 200;
    config.bring_up.repulse_every = 50;
    let boots = Arc::new(AtomicUsize::new(0));
    let boot_counter = Arc::clone(&boots);

    let link = link(config, move |platform, bus| {
        platform.with_reset_line().on_peer_boot(move || {
            boot_counter.fetch_add(1, Ordering::SeqCst);
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                bus.announce(&PeerProfile::new(ChipId::Esp32))
                    .expect("announce");
            });
        })
    });

    link.transport.reconfigure().expect("peer found");
    assert!(link.transport.is_tx_ready());
    assert_eq!(boots.load(Ordering::SeqCst), 1);
    assert_eq!(link.platform.reset_pulses(), 1);
    assert_eq!(link.ups.load(Ordering::SeqCst), 1);

    // A second bring-up while the link is up neither resets nor re-announces.
    link.transport.reconfigure().expect("already up");
    assert_eq!(link.platform.reset_pulses(), 1);
    assert_eq!(link.ups.load(Ordering::SeqCst), 1);
}
