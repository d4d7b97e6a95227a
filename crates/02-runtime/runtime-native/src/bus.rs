//! In-memory bus that records outbound frames and injects inbound ones.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use transport::hal::{BusDriver, FrameSink};
use transport::{
    BufferHandle, BusKind, ChipId, IfType, TransportError, TransportResult, TxPriority,
    RAW_TP_NONE, TAG_PEER_CAPABILITY, TAG_PEER_CHIP_ID, TAG_PEER_RX_Q_SIZE, TAG_PEER_TEST_RAW_TP,
    TAG_PEER_TX_Q_SIZE,
};
use transport_codecs::{encode_frame, encode_init_event_frame, write_header, PayloadHeader, TlvWriter};

/// One buffer handed to [`CaptureBus::submit`], as it would have gone out on
/// the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Interface the buffer was sent on.
    pub if_type: IfType,
    /// Interface instance number.
    pub if_num: u8,
    /// Payload length.
    pub len: usize,
    /// Payload offset inside the submitted storage.
    pub offset: usize,
    /// Whether the storage was a pool block transmitted in place.
    pub zero_copy: bool,
    /// Queue the engine picked for the buffer.
    pub priority: TxPriority,
    /// Packet type byte carried in the header.
    pub pkt_type: u8,
    /// Header flags.
    pub flags: u8,
    /// Full frame: header followed by payload.
    pub frame: Vec<u8>,
}

impl Submission {
    /// Payload bytes of the recorded frame.
    pub fn payload(&self) -> &[u8] {
        &self.frame[self.frame.len() - self.len..]
    }
}

/// What a simulated peer reports in its INIT event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerProfile {
    /// Chip the peer claims to be.
    pub chip: ChipId,
    /// Capability bitmap.
    pub capabilities: u8,
    /// Raw-throughput test request bits.
    pub raw_tp: u8,
    /// Peer RX queue depth.
    pub rx_queue: u8,
    /// Peer TX queue depth.
    pub tx_queue: u8,
}

impl PeerProfile {
    /// Profile of a plain peer of the given chip.
    pub fn new(chip: ChipId) -> Self {
        Self {
            chip,
            capabilities: 0,
            raw_tp: RAW_TP_NONE,
            rx_queue: 20,
            tx_queue: 20,
        }
    }

    /// INIT event TLVs for this profile.
    pub fn init_tlvs(&self) -> Vec<u8> {
        let mut writer = TlvWriter::new();
        writer
            .push_u8(TAG_PEER_CAPABILITY, self.capabilities)
            .push_u8(TAG_PEER_CHIP_ID, self.chip.raw())
            .push_u8(TAG_PEER_TEST_RAW_TP, self.raw_tp)
            .push_u8(TAG_PEER_RX_Q_SIZE, self.rx_queue)
            .push_u8(TAG_PEER_TX_Q_SIZE, self.tx_queue);
        writer.as_bytes().to_vec()
    }

    /// Complete PRIV frame carrying the INIT event.
    pub fn init_event_frame(&self, checksum: bool) -> TransportResult<Vec<u8>> {
        encode_init_event_frame(&self.init_tlvs(), checksum)
            .map_err(|err| TransportError::Bus(err.to_string()))
    }
}

/// [`BusDriver`] that keeps every submitted frame in memory.
///
/// Outbound buffers are serialised with their header exactly as a real bus
/// driver would before the transfer, then released. Inbound traffic is
/// pushed through the sink the engine registered at init.
pub struct CaptureBus {
    kind: BusKind,
    checksum: bool,
    sink: Mutex<Option<FrameSink>>,
    submissions: Mutex<Vec<Submission>>,
    fail_submits: AtomicBool,
}

impl CaptureBus {
    /// Capture bus emulating `kind`, with header checksums on.
    pub fn new(kind: BusKind) -> Self {
        Self {
            kind,
            checksum: true,
            sink: Mutex::new(None),
            submissions: Mutex::new(Vec::new()),
            fail_submits: AtomicBool::new(false),
        }
    }

    /// Disables checksums on recorded frames.
    pub fn without_checksum(mut self) -> Self {
        self.checksum = false;
        self
    }

    /// Bus flavour being emulated.
    pub fn kind(&self) -> BusKind {
        self.kind
    }

    /// Whether [`BusDriver::init`] ran and no deinit followed.
    pub fn is_initialised(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Makes subsequent submits fail, as on a saturated bus queue.
    pub fn set_fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::Relaxed);
    }

    /// Copy of everything submitted so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Drains the recorded submissions.
    pub fn take_submissions(&self) -> Vec<Submission> {
        std::mem::take(&mut *self.submissions.lock())
    }

    /// Delivers one raw frame to the engine as if it was read off the bus.
    pub fn inject_frame(&self, frame: &[u8]) -> TransportResult<()> {
        let sink = self.sink.lock().clone().ok_or(TransportError::Disconnected)?;
        sink(frame);
        Ok(())
    }

    /// Builds and injects a frame carrying `payload` on the given interface.
    pub fn inject(&self, header: &PayloadHeader, payload: &[u8]) -> TransportResult<()> {
        let frame = encode_frame(header, payload, self.checksum)
            .map_err(|err| TransportError::Bus(err.to_string()))?;
        self.inject_frame(&frame)
    }

    /// Plays the peer's boot: injects the INIT event for `profile`.
    pub fn announce(&self, profile: &PeerProfile) -> TransportResult<()> {
        let frame = profile.init_event_frame(self.checksum)?;
        self.inject_frame(&frame)
    }

    fn serialise(&self, mut buf: BufferHandle) -> TransportResult<Vec<u8>> {
        let len = u16::try_from(buf.len()).map_err(|_| TransportError::Bus("frame too long".into()))?;
        let mut header = PayloadHeader::new(buf.if_type(), buf.if_num(), len);
        header.flags = buf.flags();
        header.seq_num = buf.seq_num();
        header.pkt_type = buf.pkt_type();

        let frame = if buf.is_zero_copy() {
            header.offset = buf.offset() as u16;
            let end = buf.offset() + buf.len();
            write_header(buf.frame_mut(), &header, self.checksum)
                .map_err(|err| TransportError::Bus(err.to_string()))?;
            buf.frame()[..end].to_vec()
        } else {
            encode_frame(&header, buf.payload(), self.checksum)
                .map_err(|err| TransportError::Bus(err.to_string()))?
        };
        buf.release();
        Ok(frame)
    }
}

impl BusDriver for CaptureBus {
    fn init(&self, sink: FrameSink) -> TransportResult<()> {
        *self.sink.lock() = Some(sink);
        log::debug!("capture bus ({:?}) up", self.kind);
        Ok(())
    }

    fn deinit(&self) {
        self.sink.lock().take();
        log::debug!("capture bus ({:?}) down", self.kind);
    }

    fn submit(&self, buf: BufferHandle, priority: TxPriority) -> TransportResult<()> {
        if self.fail_submits.load(Ordering::Relaxed) {
            return Err(TransportError::QueueFull);
        }
        let record = Submission {
            if_type: buf.if_type(),
            if_num: buf.if_num(),
            len: buf.len(),
            offset: buf.offset(),
            zero_copy: buf.is_zero_copy(),
            priority,
            pkt_type: buf.pkt_type(),
            flags: buf.flags(),
            frame: Vec::new(),
        };
        let frame = self.serialise(buf)?;
        self.submissions.lock().push(Submission { frame, ..record });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use transport::{BlockPool, PAYLOAD_HEADER_LEN, PRIV_PACKET_TYPE_EVENT};
    use transport_codecs::decode_frame;

    #[test]
    fn zero_copy_submit_writes_header_in_place_and_frees_block() {
        let bus = CaptureBus::new(BusKind::Spi);
        let pool = BlockPool::create(BusKind::Spi.max_buffer_size()).expect("pool");
        let mut block = pool.alloc(PAYLOAD_HEADER_LEN + 4, true).expect("alloc");
        block.as_mut_slice()[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + 4]
            .copy_from_slice(b"ping");
        let buf = BufferHandle::from_pool(
            IfType::Sta,
            0,
            Arc::clone(&pool),
            block,
            PAYLOAD_HEADER_LEN,
            4,
        );

        bus.submit(buf, TxPriority::Others).expect("submit");

        let sent = bus.take_submissions();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].zero_copy);
        assert_eq!(sent[0].payload(), b"ping");
        let decoded = decode_frame(&sent[0].frame, true).expect("valid frame");
        assert_eq!(decoded.header.if_type, IfType::Sta);
        assert_eq!(pool.live_blocks(), 0);
    }

    #[test]
    fn owned_submit_is_framed_by_copy() {
        let bus = CaptureBus::new(BusKind::Sdio).without_checksum();
        let buf = BufferHandle::from_vec(IfType::Serial, 1, b"at".to_vec());
        bus.submit(buf, TxPriority::Serial).expect("submit");
        let sent = bus.submissions();
        assert!(!sent[0].zero_copy);
        assert_eq!(sent[0].frame.len(), PAYLOAD_HEADER_LEN + 2);
        assert_eq!(sent[0].priority, TxPriority::Serial);
    }

    #[test]
    fn announce_requires_init_and_delivers_init_event() {
        let bus = CaptureBus::new(BusKind::Spi);
        let profile = PeerProfile::new(ChipId::Esp32);
        assert_eq!(bus.announce(&profile), Err(TransportError::Disconnected));

        let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let sink_seen = Arc::clone(&seen);
        bus.init(Arc::new(move |frame: &[u8]| sink_seen.lock().push(frame.to_vec())))
            .expect("init");
        bus.announce(&profile).expect("announce");

        let frames = seen.lock();
        let decoded = decode_frame(&frames[0], true).expect("valid frame");
        assert_eq!(decoded.header.if_type, IfType::Priv);
        assert_eq!(decoded.header.pkt_type, PRIV_PACKET_TYPE_EVENT);
    }

    #[test]
    fn failing_bus_keeps_nothing() {
        let bus = CaptureBus::new(BusKind::Spi);
        bus.set_fail_submits(true);
        let buf = BufferHandle::from_vec(IfType::Sta, 0, vec![1]);
        assert_eq!(bus.submit(buf, TxPriority::Others), Err(TransportError::QueueFull));
        assert!(bus.submissions().is_empty());
    }
}
