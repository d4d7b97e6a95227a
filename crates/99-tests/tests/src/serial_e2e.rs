#![cfg(all(test, not(target_arch = "wasm32")))]

use runtime_native::{CaptureBus, NativePlatform, NativeTimers};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use transport::{BufferHandle, IfType, FLAG_MORE_FRAGMENT};
use transport_codecs::PayloadHeader;
use transport_driver::{Collaborators, LinkConfig, SerialHandle, SerialNotify, Transport};

const MESSAGES: usize = 20;
const FRAGMENT: usize = 5;

fn transport() -> (Transport, Arc<CaptureBus>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = Arc::new(CaptureBus::new(transport::BusKind::Sdio));
    let config = LinkConfig {
        bus: transport::BusKind::Sdio,
        ..LinkConfig::default()
    };
    let transport = Transport::setup(
        config,
        Collaborators {
            bus: bus.clone(),
            platform: Arc::new(NativePlatform::new().on_restart(|_reason| {})),
            timers: Arc::new(NativeTimers::new()),
        },
        None,
    )
    .expect("setup");
    (transport, bus)
}

fn send_message(bus: &CaptureBus, if_num: u8, message: &[u8]) {
    let fragments: Vec<&[u8]> = message.chunks(FRAGMENT).collect();
    for (index, fragment) in fragments.iter().enumerate() {
        let mut header = PayloadHeader::new(IfType::Serial, if_num, fragment.len() as u16);
        if index + 1 < fragments.len() {
            header.flags = FLAG_MORE_FRAGMENT;
        }
        bus.inject(&header, fragment).expect("inject fragment");
    }
}

fn message(if_num: u8, seq: usize) -> Vec<u8> {
    format!("conn{if_num}:msg{seq:02}:payload").into_bytes()
}

fn spawn_reader(
    handle: SerialHandle,
    consumed: Arc<AtomicUsize>,
) -> thread::JoinHandle<Vec<Vec<u8>>> {
    thread::spawn(move || {
        (0..MESSAGES)
            .map(|_| {
                let buf = handle
                    .read_timeout(Duration::from_secs(5))
                    .expect("message");
                consumed.fetch_add(1, Ordering::SeqCst);
                buf.into_vec()
            })
            .collect()
    })
}

#[test]
fn two_connections_receive_their_own_streams() {
    let (transport, bus) = transport();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let notify: SerialNotify = Arc::new(move |_if_num: u8| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let first = transport.serial_init(Some(Arc::clone(&notify))).expect("first");
    let second = transport.serial_init(Some(notify)).expect("second");

    let consumed = [Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0))];
    let readers = [
        spawn_reader(first.clone(), Arc::clone(&consumed[0])),
        spawn_reader(second.clone(), Arc::clone(&consumed[1])),
    ];

    // Pace the peer so neither receive queue overflows.
    let deadline = Instant::now() + Duration::from_secs(10);
    for seq in 0..MESSAGES {
        for if_num in 0..2u8 {
            while seq - consumed[if_num as usize].load(Ordering::SeqCst) >= 8 {
                assert!(Instant::now() < deadline, "reader {if_num} stalled");
                thread::yield_now();
            }
            send_message(&bus, if_num, &message(if_num, seq));
        }
    }

    for (if_num, reader) in readers.into_iter().enumerate() {
        let received = reader.join().expect("reader");
        let expected: Vec<Vec<u8>> = (0..MESSAGES)
            .map(|seq| message(if_num as u8, seq))
            .collect();
        assert_eq!(received, expected);
    }
    assert_eq!(notified.load(Ordering::SeqCst), 2 * MESSAGES);

    first.close().expect("close first");
    second.close().expect("close second");
}

#[test]
fn interleaved_fragment_discards_the_pending_message() {
    let (transport, bus) = transport();
    let first = transport.serial_init(None).expect("first");
    let second = transport.serial_init(None).expect("second");

    let mut head = PayloadHeader::new(IfType::Serial, 0, 4);
    head.flags = FLAG_MORE_FRAGMENT;
    bus.inject(&head, b"head").expect("head");
    send_message(&bus, 1, b"other");
    send_message(&bus, 0, b"tail");

    let read = |handle: &SerialHandle| {
        handle
            .read_timeout(Duration::from_millis(500))
            .map(BufferHandle::into_vec)
            .expect("message")
    };
    assert_eq!(read(&second), b"other");
    assert_eq!(read(&first), b"tail");
    assert!(first.try_read().is_err());
}

#[test]
fn reopen_drops_queued_messages() {
    let (transport, bus) = transport();
    let handle = transport.serial_init(None).expect("serial");
    send_message(&bus, 0, b"stale");
    handle.open().expect("reopen");
    assert!(handle.try_read().is_err());
    send_message(&bus, 0, b"fresh");
    assert_eq!(
        handle.try_read().map(BufferHandle::into_vec).expect("fresh"),
        b"fresh"
    );
}
