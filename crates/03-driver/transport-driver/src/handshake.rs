//! Link bring-up and the capability handshake.
//!
//! After a reset the peer announces itself with an INIT event on the PRIV
//! interface. The host checks the reported chip against the one it was
//! built for, moves the link to TX_ACTIVE and answers with its own
//! configuration TLVs.

use crate::engine::Transport;
use crate::error::{DriverError, DriverResult};
use crate::raw_tp::RawTpSend;
use crate::state::TransportState;
use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use transport::hal::{ResetLevel, TimerKind, WakeReason};
use transport::{
    BufferHandle, ChipId, IfType, CAP_BLE_ONLY, CAP_BR_EDR_ONLY, CAP_BT_SDIO, CAP_BT_UART,
    CAP_WLAN_SDIO, CHIP_UNRECOGNIZED, MAX_INIT_EVENT_LEN, PRIV_EVENT_INIT, PRIV_PACKET_TYPE_EVENT,
    TAG_HOST_CAPABILITIES, TAG_HOST_FLOW_CTL_CLEAR, TAG_HOST_FLOW_CTL_START,
    TAG_HOST_RCVD_CHIP_ID, TAG_HOST_TEST_RAW_TP, TAG_PEER_CAPABILITY, TAG_PEER_CHIP_ID,
    TAG_PEER_RX_Q_SIZE, TAG_PEER_TEST_RAW_TP, TAG_PEER_TX_Q_SIZE,
};
use transport_codecs::{PrivEvent, TlvReader, TlvWriter};

/// What the peer reported in an accepted INIT event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub chip: ChipId,
    pub capabilities: u8,
    pub raw_tp: u8,
    pub rx_queue_size: Option<u8>,
    pub tx_queue_size: Option<u8>,
}

/// Human-readable feature list for a peer capability bitmap.
pub fn capability_features(cap: u8) -> SmallVec<[&'static str; 6]> {
    let mut features = SmallVec::new();
    if cap & CAP_WLAN_SDIO != 0 {
        features.push("WLAN");
    }
    if cap & (CAP_BT_UART | CAP_BT_SDIO) != 0 {
        features.push("BT/BLE");
        if cap & CAP_BT_UART != 0 {
            features.push("HCI over UART");
        }
        if cap & CAP_BT_SDIO != 0 {
            features.push("HCI over SDIO");
        }
        let ble = cap & CAP_BLE_ONLY != 0;
        let br_edr = cap & CAP_BR_EDR_ONLY != 0;
        match (ble, br_edr) {
            (true, true) => features.push("BT/BLE dual mode"),
            (true, false) => features.push("BLE only"),
            (false, true) => features.push("BR EDR only"),
            (false, false) => {}
        }
    }
    features
}

impl Transport {
    /// Drives bring-up until the peer's handshake lands.
    ///
    /// Arms the init timeout, then either trusts the wake reason (no reset
    /// line) or pulses the peer's reset line and polls for TX_ACTIVE,
    /// re-pulsing every `repulse_every` failed polls.
    pub fn reconfigure(&self) -> DriverResult<()> {
        let inner = &self.inner;
        let bring_up = &inner.config.bring_up;
        log::info!(
            "attempting connection with peer: retry[{}]",
            inner.retry.load(Ordering::Relaxed)
        );

        self.arm_init_timer()?;

        let has_reset_line = inner.platform.has_reset_line();
        match inner.platform.wake_reason() {
            WakeReason::DeepSleep => {
                log::info!("host awake from deep sleep");
                inner.state.advance(TransportState::TxActive);
            }
            WakeReason::ColdBoot => {
                log::info!("host bootup");
                if !has_reset_line {
                    inner.state.advance(TransportState::RxActive);
                }
            }
        }

        if has_reset_line {
            if self.is_tx_ready() {
                log::info!("transport is already up");
            } else {
                self.reset_peer();
                inner.state.advance(TransportState::RxActive);

                while !self.is_tx_ready() {
                    let attempt = inner.retry.load(Ordering::Relaxed);
                    if attempt >= bring_up.max_retry {
                        log::error!("failed to get peer transport up");
                        return Err(DriverError::BringUpFailed { retries: attempt });
                    }
                    let attempt = inner.retry.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempt % bring_up.repulse_every == 0 {
                        log::error!("not able to connect with peer device");
                        self.reset_peer();
                    }
                    inner.platform.sleep(bring_up.poll_interval());
                }
            }
        }

        inner.retry.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn reset_peer(&self) {
        let platform = &self.inner.platform;
        let bring_up = &self.inner.config.bring_up;
        log::warn!("resetting peer");
        platform.set_reset_line(ResetLevel::Run);
        platform.sleep(bring_up.reset_hold());
        platform.set_reset_line(ResetLevel::Hold);
        platform.sleep(bring_up.reset_hold());
        platform.set_reset_line(ResetLevel::Run);
        platform.sleep(bring_up.reset_settle());
    }

    fn arm_init_timer(&self) -> DriverResult<()> {
        let mut slot = self.inner.init_timer.lock();
        if slot.is_some() {
            return Ok(());
        }
        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.timers.start(
            self.inner.config.bring_up.init_timeout(),
            TimerKind::OneShot,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    log::error!("init event not received within timeout, restarting");
                    inner.platform.restart("init event not received within timeout");
                }
            }),
        )?;
        *slot = Some(timer);
        log::info!("started init timeout timer");
        Ok(())
    }

    /// Handles one PRIV event payload. Only INIT is understood.
    pub fn process_priv_event(&self, payload: &[u8]) -> DriverResult<()> {
        if payload.is_empty() {
            return Ok(());
        }
        let event = PrivEvent::parse(payload)?;
        if event.event_type != PRIV_EVENT_INIT {
            log::warn!("dropping unknown event {:#04x}", event.event_type);
            return Ok(());
        }
        log::info!("received INIT event from peer");
        self.process_init_event(event.data)
            .inspect_err(|err| log::error!("failed to process init event: {err}"))
            .map(|_| ())
    }

    /// Parses the peer's INIT TLVs, validates the chip and completes the
    /// handshake. On a refused peer the state is left untouched.
    pub fn process_init_event(&self, tlvs: &[u8]) -> DriverResult<PeerInfo> {
        if let Some(mut timer) = self.inner.init_timer.lock().take() {
            timer.stop();
            log::info!("init event received within timeout, cleared timer");
        }

        log::debug!("init event length: {}", tlvs.len());
        if tlvs.len() > MAX_INIT_EVENT_LEN {
            log::error!("init event length {} exceeds {MAX_INIT_EVENT_LEN}", tlvs.len());
            return Err(DriverError::InitEventTooLong {
                len: tlvs.len(),
                max: MAX_INIT_EVENT_LEN,
            });
        }

        let mut capabilities = 0;
        let mut chip_raw = CHIP_UNRECOGNIZED;
        let mut raw_tp = 0;
        let mut rx_queue_size = None;
        let mut tx_queue_size = None;
        for tlv in TlvReader::new(tlvs) {
            let tlv = tlv?;
            let value = tlv.first_byte();
            match tlv.tag {
                TAG_PEER_CAPABILITY => {
                    capabilities = value.unwrap_or(0);
                    log::info!("peer capabilities: {capabilities:#04x}");
                    for feature in capability_features(capabilities) {
                        log::info!("\t * {feature}");
                    }
                }
                TAG_PEER_CHIP_ID => chip_raw = value.unwrap_or(CHIP_UNRECOGNIZED),
                TAG_PEER_TEST_RAW_TP => raw_tp = value.unwrap_or(0),
                TAG_PEER_RX_Q_SIZE => {
                    rx_queue_size = value;
                    log::debug!("peer rx queue size: {value:?}");
                }
                TAG_PEER_TX_Q_SIZE => {
                    tx_queue_size = value;
                    log::debug!("peer tx queue size: {value:?}");
                }
                other => log::debug!("unsupported init tag {other:#04x}"),
            }
        }

        let Some(chip) = ChipId::from_raw(chip_raw) else {
            log::warn!(
                "peer board type not recognised [{chip_raw:#04x}] ({})",
                ChipId::name_of(chip_raw)
            );
            return Err(DriverError::UnsupportedChip(chip_raw));
        };
        let expected = self.inner.config.expected_chip;
        if chip != expected {
            log::error!("identified peer [{chip}] != expected [{expected}]");
            return Err(DriverError::ChipMismatch {
                expected,
                found: chip,
            });
        }
        log::info!("peer board type is {chip}");

        let info = PeerInfo {
            chip,
            capabilities,
            raw_tp,
            rx_queue_size,
            tx_queue_size,
        };
        *self.inner.peer.lock() = Some(info);

        if self.inner.state.advance(TransportState::TxActive) {
            log::info!("base transport is set up");
            if let Some(up) = &self.inner.up_callback {
                up();
            }
        }

        self.start_raw_tp(raw_tp)?;
        self.send_host_config(chip)?;
        Ok(info)
    }

    fn start_raw_tp(&self, peer_flags: u8) -> DriverResult<()> {
        let weak = Arc::downgrade(&self.inner);
        let send: RawTpSend = Arc::new(move |frame: Vec<u8>| {
            Transport::upgrade(&weak)?.tx(BufferHandle::from_vec(IfType::Test, 0, frame))
        });
        self.inner
            .raw_tp
            .start(peer_flags, self.inner.timers.as_ref(), send)
    }

    /// Replies to INIT with the host's configuration TLVs.
    fn send_host_config(&self, chip: ChipId) -> DriverResult<()> {
        let config = &self.inner.config;
        let (low, high) = config.flow_control.advertised_thresholds();
        let raw_tp = self.inner.raw_tp.host_bits();

        let mut tlvs = TlvWriter::new();
        tlvs.push_u8(TAG_HOST_CAPABILITIES, config.host_capabilities)
            .push_u8(TAG_HOST_RCVD_CHIP_ID, chip.raw())
            .push_u8(TAG_HOST_TEST_RAW_TP, raw_tp)
            .push_u8(TAG_HOST_FLOW_CTL_START, high)
            .push_u8(TAG_HOST_FLOW_CTL_CLEAR, low);
        log::info!(
            "raw_tp_dir[{}], flow_ctrl: low[{low}] high[{high}]",
            if raw_tp == 0 {
                "-"
            } else {
                config.raw_throughput.direction.label()
            }
        );

        let event = PrivEvent {
            event_type: PRIV_EVENT_INIT,
            data: tlvs.as_bytes(),
        }
        .encode()?;
        let buf =
            BufferHandle::from_vec(IfType::Priv, 0, event).with_pkt_type(PRIV_PACKET_TYPE_EVENT);
        self.tx(buf)
    }
}
