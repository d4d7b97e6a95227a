//! The transport engine: lifecycle, channel registry and TX/RX dispatch.

use crate::channel::{Channel, ChannelTable, RxFn, TxFn};
use crate::config::LinkConfig;
use crate::error::{DriverError, DriverResult};
use crate::flow_control::FlowControl;
use crate::handshake::PeerInfo;
use crate::raw_tp::{RawThroughput, ThroughputReport};
use crate::serial::SerialHub;
use crate::state::{StateCell, TransportState};
use crate::stats::{bump, PacketStats, PacketStatsSnapshot};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Weak};
use std::time::Duration;
use transport::hal::{BusDriver, FrameSink, Platform, TimerHandle, TimerKind, TimerService};
use transport::{
    BlockPool, BufferHandle, IfType, PoolStats, ThrottleCmd, TransportError, TxPriority,
    PAYLOAD_HEADER_LEN, PRIV_PACKET_TYPE_EVENT,
};
use transport_codecs::decode_frame;

/// Fired once when the link reaches TX_ACTIVE through the handshake.
pub type UpCallback = Arc<dyn Fn() + Send + Sync>;

/// Collaborators a host port plugs into the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub bus: Arc<dyn BusDriver>,
    pub platform: Arc<dyn Platform>,
    pub timers: Arc<dyn TimerService>,
}

pub(crate) struct LinkInner {
    pub(crate) config: LinkConfig,
    pub(crate) bus: Arc<dyn BusDriver>,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) timers: Arc<dyn TimerService>,
    pub(crate) state: StateCell,
    pub(crate) channels: ChannelTable,
    pub(crate) flow: FlowControl,
    pub(crate) serial: SerialHub,
    pub(crate) stats: PacketStats,
    pub(crate) raw_tp: RawThroughput,
    pub(crate) init_timer: Mutex<Option<Box<dyn TimerHandle>>>,
    pub(crate) stats_timer: Mutex<Option<Box<dyn TimerHandle>>>,
    pub(crate) up_callback: Option<UpCallback>,
    pub(crate) retry: AtomicU32,
    pub(crate) peer: Mutex<Option<PeerInfo>>,
}

/// Handle to one transport instance. Clones share the instance.
#[derive(Clone)]
pub struct Transport {
    pub(crate) inner: Arc<LinkInner>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("bus", &self.inner.config.bus)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Validates `config`, brings the bus up and arms the statistics timer.
    /// The link starts INACTIVE; [`Transport::reconfigure`] drives bring-up.
    pub fn setup(
        config: LinkConfig,
        collaborators: Collaborators,
        up_callback: Option<UpCallback>,
    ) -> DriverResult<Self> {
        config.validate()?;
        let Collaborators {
            bus,
            platform,
            timers,
        } = collaborators;

        let inner = Arc::new(LinkInner {
            flow: FlowControl::new(&config.flow_control),
            serial: SerialHub::new(config.serial.clone()),
            raw_tp: RawThroughput::new(config.raw_throughput.clone()),
            config,
            bus,
            platform,
            timers,
            state: StateCell::new(),
            channels: ChannelTable::default(),
            stats: PacketStats::default(),
            init_timer: Mutex::new(None),
            stats_timer: Mutex::new(None),
            up_callback,
            retry: AtomicU32::new(0),
            peer: Mutex::new(None),
        });
        let transport = Self { inner };

        let weak = Arc::downgrade(&transport.inner);
        let sink: FrameSink = Arc::new(move |frame: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = (Transport { inner }).receive_frame(frame) {
                    log::warn!("dropping rx frame: {err}");
                }
            }
        });
        transport.inner.bus.init(sink)?;
        log::info!(
            "transport set up on {:?}, h2s wifi flow control policy: {:?}",
            transport.inner.config.bus,
            transport.inner.flow.policy()
        );
        transport.start_stats_timer()?;
        Ok(transport)
    }

    pub(crate) fn upgrade(weak: &Weak<LinkInner>) -> DriverResult<Self> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or(DriverError::Transport(TransportError::Disconnected))
    }

    fn start_stats_timer(&self) -> DriverResult<()> {
        let interval_ms = self.inner.config.stats.report_interval_ms;
        if interval_ms == 0 {
            return Ok(());
        }
        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.timers.start(
            Duration::from_millis(interval_ms),
            TimerKind::Periodic,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.stats.log_report();
                }
            }),
        )?;
        *self.inner.stats_timer.lock() = Some(timer);
        Ok(())
    }

    /// Stops every timer, the throughput test and the bus; the link returns
    /// to INACTIVE.
    pub fn teardown(&self) {
        for slot in [&self.inner.init_timer, &self.inner.stats_timer] {
            if let Some(mut timer) = slot.lock().take() {
                timer.stop();
            }
        }
        self.inner.raw_tp.cleanup();
        self.inner.bus.deinit();
        self.inner.state.reset();
        log::info!("transport torn down");
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn state(&self) -> TransportState {
        self.inner.state.load()
    }

    pub fn is_rx_ready(&self) -> bool {
        self.state() >= TransportState::RxActive
    }

    pub fn is_tx_ready(&self) -> bool {
        self.state() >= TransportState::TxActive
    }

    pub fn packet_stats(&self) -> PacketStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn flow_control(&self) -> &FlowControl {
        &self.inner.flow
    }

    /// Closes the current raw throughput window and returns its rates.
    pub fn throughput_report(&self) -> ThroughputReport {
        self.inner.raw_tp.report_now()
    }

    pub fn is_throughput_test_running(&self) -> bool {
        self.inner.raw_tp.is_running()
    }

    /// What the peer reported in its last accepted INIT event.
    pub fn peer_info(&self) -> Option<PeerInfo> {
        *self.inner.peer.lock()
    }

    pub fn channel(&self, if_type: IfType) -> Option<Arc<Channel>> {
        self.inner.channels.get(if_type)
    }

    pub fn pool_stats(&self, if_type: IfType) -> Option<PoolStats> {
        self.channel(if_type).map(|channel| channel.pool_stats())
    }

    /// Registers the channel for `if_type` and returns it with its bound TX
    /// function. An existing registration is replaced.
    pub fn add_channel(
        &self,
        if_type: IfType,
        secure: bool,
        rx: RxFn,
    ) -> DriverResult<(Arc<Channel>, TxFn)> {
        if !matches!(if_type, IfType::Sta | IfType::Ap | IfType::Serial) {
            log::warn!("not yet supported interface {if_type}");
            return Err(DriverError::UnsupportedInterface(if_type));
        }

        let pool = BlockPool::create(self.inner.config.bus.max_buffer_size())?;
        let channel = Arc::new(Channel::new(if_type, secure, rx, pool));
        if let Some(old) = self.inner.channels.insert(Arc::clone(&channel)) {
            log::warn!("channel [{if_type}] already created, replaced with new callbacks");
            old.pool().destroy();
        }

        let weak = Arc::downgrade(&self.inner);
        let bound = Arc::clone(&channel);
        let tx: TxFn = if if_type == IfType::Serial {
            Arc::new(move |payload: &[u8]| {
                let transport = Transport::upgrade(&weak)?;
                transport.check_current(&bound)?;
                transport.serial_tx(0, payload)
            })
        } else {
            Arc::new(move |payload: &[u8]| Transport::upgrade(&weak)?.data_tx(&bound, payload))
        };

        log::info!(
            "added channel [{if_type}] secure[{secure}] pool[{}]",
            channel.pool().id()
        );
        Ok((channel, tx))
    }

    /// Unregisters `channel` and destroys its pool. Fails for a handle that
    /// was already removed or replaced.
    pub fn remove_channel(&self, channel: &Arc<Channel>) -> DriverResult<PoolStats> {
        let if_type = channel.if_type();
        if !self.inner.channels.remove_if_current(channel) {
            log::error!("remove_channel: stale handle for [{if_type}]");
            return Err(DriverError::StaleChannel(if_type));
        }
        if if_type == IfType::Serial {
            self.inner.serial.close_all();
        }
        let stats = channel.pool().destroy();
        log::info!(
            "removed channel [{if_type}]: fresh[{}] reuse[{}] free[{}] live[{}]",
            stats.num_fresh_alloc,
            stats.num_reuse,
            stats.num_free,
            stats.live_blocks
        );
        Ok(stats)
    }

    fn check_current(&self, channel: &Arc<Channel>) -> DriverResult<()> {
        if self.inner.channels.is_current(channel) {
            Ok(())
        } else {
            Err(DriverError::StaleChannel(channel.if_type()))
        }
    }

    /// STA/AP transmit: stale-handle check, flow gate, then copy into a pool block behind the
    /// header headroom and hand the block to the bus without another copy.
    fn data_tx(&self, channel: &Arc<Channel>, payload: &[u8]) -> DriverResult<()> {
        if payload.is_empty() {
            return Ok(());
        }
        self.check_current(channel)?;
        let if_type = channel.if_type();
        let stats = &self.inner.stats;
        if if_type == IfType::Sta {
            if !self.inner.flow.admit() {
                bump(&stats.sta_tx_flowctrl_drop);
                return Err(DriverError::FlowControlDrop);
            }
            bump(&stats.sta_tx_in_pass);
        }

        let max = self.inner.config.bus.max_payload_size();
        if payload.len() > max {
            return Err(DriverError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        let pool = channel.pool();
        let mut block = pool.alloc(self.inner.config.bus.max_buffer_size(), true)?;
        block.as_mut_slice()[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + payload.len()]
            .copy_from_slice(payload);
        let buf = BufferHandle::from_pool(
            if_type,
            0,
            Arc::clone(pool),
            block,
            PAYLOAD_HEADER_LEN,
            payload.len(),
        );
        self.tx(buf)
    }

    /// Generic transmit entry. The buffer is released on every failure path.
    pub fn tx(&self, buf: BufferHandle) -> DriverResult<()> {
        let if_type = buf.if_type();
        let is_sta = if_type == IfType::Sta;
        if is_sta {
            bump(&self.inner.stats.sta_tx_trans_in);
        }
        if !self.is_tx_ready() {
            log::error!("tx on [{if_type}] before transport is up");
            return Err(DriverError::TransportNotReady);
        }
        if buf.is_empty() {
            return Err(DriverError::EmptyPayload);
        }
        let max = self.inner.config.bus.max_payload_size();
        if buf.len() > max {
            return Err(DriverError::PayloadTooLarge {
                len: buf.len(),
                max,
            });
        }

        match self.inner.bus.submit(buf, TxPriority::for_interface(if_type)) {
            Ok(()) => {
                if is_sta {
                    bump(&self.inner.stats.sta_tx_out);
                }
                Ok(())
            }
            Err(err) => {
                if is_sta {
                    bump(&self.inner.stats.sta_tx_out_drop);
                }
                log::error!("bus rejected [{if_type}] frame: {err}");
                Err(err.into())
            }
        }
    }

    /// Entry point for raw frames read off the bus.
    pub fn receive_frame(&self, frame: &[u8]) -> DriverResult<()> {
        let decoded = decode_frame(frame, self.inner.config.checksum)?;
        let header = decoded.header;
        self.apply_throttle(header.throttle);

        if header.if_type == IfType::Priv && header.pkt_type != PRIV_PACKET_TYPE_EVENT {
            log::debug!("ignoring priv packet type {:#04x}", header.pkt_type);
            return Ok(());
        }
        if decoded.payload.is_empty() {
            return Ok(());
        }

        let buf = self
            .rx_buffer(header.if_type, header.if_num, decoded.payload)?
            .with_flags(header.flags)
            .with_pkt_type(header.pkt_type)
            .with_seq_num(header.seq_num);
        self.deliver_rx(buf)
    }

    fn apply_throttle(&self, cmd: ThrottleCmd) {
        let stats = &self.inner.stats;
        match self.inner.flow.apply(cmd) {
            Some(ThrottleCmd::On) => bump(&stats.sta_flow_ctrl_on),
            Some(ThrottleCmd::Off) => bump(&stats.sta_flow_ctrl_off),
            _ => {}
        }
    }

    /// Data frames land in the channel's pool; everything else on the heap.
    fn rx_buffer(&self, if_type: IfType, if_num: u8, payload: &[u8]) -> DriverResult<BufferHandle> {
        let channel = match if_type {
            IfType::Sta | IfType::Ap => self.inner.channels.get(if_type),
            _ => None,
        };
        let Some(channel) = channel else {
            return Ok(BufferHandle::from_vec(if_type, if_num, payload.to_vec()));
        };
        let pool = channel.pool();
        let mut block = pool.alloc(PAYLOAD_HEADER_LEN + payload.len(), false)?;
        block.as_mut_slice()[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + payload.len()]
            .copy_from_slice(payload);
        Ok(BufferHandle::from_pool(
            if_type,
            if_num,
            Arc::clone(pool),
            block,
            PAYLOAD_HEADER_LEN,
            payload.len(),
        ))
    }

    /// Routes one received buffer: PRIV to the handshake, SERIAL to the
    /// reassembler, TEST to the throughput counters, the rest to the channel.
    pub fn deliver_rx(&self, buf: BufferHandle) -> DriverResult<()> {
        match buf.if_type() {
            IfType::Priv => self.process_priv_event(buf.payload()),
            IfType::Serial => self.serial_rx_handler(buf),
            IfType::Test => {
                self.inner.raw_tp.record_rx(buf.len());
                Ok(())
            }
            if_type => {
                let is_sta = if_type == IfType::Sta;
                if matches!(if_type, IfType::Sta | IfType::Ap) && !self.is_rx_ready() {
                    return Err(DriverError::TransportNotReady);
                }
                if is_sta {
                    bump(&self.inner.stats.sta_rx_in);
                }
                let channel = self
                    .inner
                    .channels
                    .get(if_type)
                    .ok_or(DriverError::NotRegistered(if_type))?;
                channel.deliver(buf);
                if is_sta {
                    bump(&self.inner.stats.sta_rx_out);
                }
                Ok(())
            }
        }
    }
}
