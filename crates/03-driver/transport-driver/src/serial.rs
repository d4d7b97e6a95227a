//! Serial control channel: connection registry and fragment reassembly.
//!
//! Fragments of one message must arrive in bus order; frames carry no
//! sequence numbers to recover otherwise. One accumulator serves every
//! connection, so an in-flight message is discarded when fragments for a
//! different connection cut in.

use crate::config::{SerialConfig, MAX_SERIAL_INTF};
use crate::engine::Transport;
use crate::error::{DriverError, DriverResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use transport::{BoundedQueue, BufferHandle, IfType, TransportError, Wait, FLAG_MORE_FRAGMENT};

/// Called with the connection's interface number once a message is queued.
pub type SerialNotify = Arc<dyn Fn(u8) + Send + Sync>;

/// Blocking reads re-check the connection state this often.
const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialState {
    /// Registered, not opened yet.
    Init,
    Active,
    /// Closed; every further operation fails.
    Destroy,
}

pub(crate) struct SerialConnection {
    if_num: u8,
    state: Mutex<SerialState>,
    queue: Mutex<Option<BoundedQueue<BufferHandle>>>,
    notify: Option<SerialNotify>,
}

impl SerialConnection {
    fn state(&self) -> SerialState {
        *self.state.lock()
    }
}

impl fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialConnection")
            .field("if_num", &self.if_num)
            .field("state", &self.state())
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Accumulator {
    if_num: u8,
    data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct SerialHub {
    config: SerialConfig,
    connections: Mutex<[Option<Arc<SerialConnection>>; MAX_SERIAL_INTF]>,
    accumulator: Mutex<Option<Accumulator>>,
}

impl SerialHub {
    pub(crate) fn new(config: SerialConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(Default::default()),
            accumulator: Mutex::new(None),
        }
    }

    /// Claims the lowest free connection number.
    pub(crate) fn register(&self, notify: Option<SerialNotify>) -> DriverResult<u8> {
        let mut slots = self.connections.lock();
        let max = self.config.max_connections.min(MAX_SERIAL_INTF);
        let free = slots[..max]
            .iter()
            .position(Option::is_none)
            .ok_or(DriverError::SerialLimit(max))?;
        let if_num = free as u8;
        slots[free] = Some(Arc::new(SerialConnection {
            if_num,
            state: Mutex::new(SerialState::Init),
            queue: Mutex::new(None),
            notify,
        }));
        Ok(if_num)
    }

    fn connection(&self, if_num: u8) -> Option<Arc<SerialConnection>> {
        self.connections
            .lock()
            .get(if_num as usize)
            .and_then(|slot| slot.clone())
    }

    fn active(&self, if_num: u8) -> DriverResult<Arc<SerialConnection>> {
        self.connection(if_num)
            .filter(|conn| conn.state() == SerialState::Active)
            .ok_or(DriverError::SerialNotActive(if_num))
    }

    pub(crate) fn state(&self, if_num: u8) -> Option<SerialState> {
        self.connection(if_num).map(|conn| conn.state())
    }

    /// (Re)creates the receive queue and marks the connection active.
    pub(crate) fn open(&self, if_num: u8) -> DriverResult<()> {
        let conn = self
            .connection(if_num)
            .filter(|conn| conn.state() != SerialState::Destroy)
            .ok_or(DriverError::SerialNotActive(if_num))?;
        let queue = BoundedQueue::new(self.config.queue_depth)?;
        if let Some(old) = conn.queue.lock().replace(queue) {
            log::warn!(
                "discarding earlier serial queue {if_num} ({} pending)",
                old.len()
            );
        }
        *conn.state.lock() = SerialState::Active;
        Ok(())
    }

    /// Tears the connection down and frees its number.
    pub(crate) fn close(&self, if_num: u8) -> DriverResult<()> {
        let conn = self
            .connections
            .lock()
            .get_mut(if_num as usize)
            .and_then(Option::take)
            .ok_or(DriverError::SerialNotActive(if_num))?;
        *conn.state.lock() = SerialState::Destroy;
        if conn.queue.lock().take().is_some() {
            log::info!("cleaning up serial queue {if_num}");
        }
        let mut acc = self.accumulator.lock();
        if acc.as_ref().is_some_and(|pending| pending.if_num == if_num) {
            acc.take();
        }
        Ok(())
    }

    pub(crate) fn close_all(&self) {
        for if_num in 0..MAX_SERIAL_INTF as u8 {
            // Free slots report NotActive; nothing to do for them.
            let _ = self.close(if_num);
        }
        self.accumulator.lock().take();
    }

    /// Dequeues one message, validating it is non-empty.
    pub(crate) fn read(&self, if_num: u8, wait: Wait) -> DriverResult<BufferHandle> {
        let queue = self
            .active(if_num)?
            .queue
            .lock()
            .clone()
            .ok_or(DriverError::SerialNotActive(if_num))?;

        let buf = match wait {
            Wait::Forever => loop {
                match queue.recv(Wait::Timeout(READ_POLL)) {
                    Ok(buf) => break buf,
                    Err(TransportError::TimedOut) => {
                        self.active(if_num)?;
                    }
                    Err(err) => return Err(err.into()),
                }
            },
            other => queue.recv(other)?,
        };

        if buf.is_empty() {
            log::error!("serial {if_num}: dequeued an empty buffer");
            return Err(DriverError::EmptyPayload);
        }
        Ok(buf)
    }

    /// Accumulates one bus-delivered serial buffer; queues the message on the
    /// final fragment. Any failure discards the in-flight message.
    pub(crate) fn rx_handler(&self, buf: BufferHandle) -> DriverResult<()> {
        let result = self.reassemble(buf);
        if let Err(err) = &result {
            self.accumulator.lock().take();
            log::error!("serial rx failed ({err}), discarding current message");
        }
        result
    }

    fn reassemble(&self, buf: BufferHandle) -> DriverResult<()> {
        if buf.is_empty() {
            return Err(DriverError::EmptyPayload);
        }
        let if_num = buf.if_num();
        let conn = self.active(if_num)?;

        let message = {
            let mut acc = self.accumulator.lock();
            if acc.as_ref().is_some_and(|pending| pending.if_num != if_num) {
                log::warn!("serial {if_num}: fragments interleaved with another connection");
                acc.take();
            }
            let pending = acc.get_or_insert_with(|| Accumulator {
                if_num,
                data: Vec::new(),
            });

            let total = pending.data.len() + buf.len();
            if total > self.config.max_message_len {
                return Err(DriverError::MessageTooLarge {
                    max: self.config.max_message_len,
                });
            }
            pending
                .data
                .try_reserve(buf.len())
                .map_err(|_| TransportError::AllocationFailed {
                    size: total,
                    alignment: 1,
                })?;
            pending.data.extend_from_slice(buf.payload());

            if buf.flags() & FLAG_MORE_FRAGMENT != 0 {
                log::trace!("serial {if_num}: fragment, {total} bytes so far");
                return Ok(());
            }
            acc.take().map(|pending| pending.data).unwrap_or_default()
        };
        buf.release();

        let queue = conn
            .queue
            .lock()
            .clone()
            .ok_or(DriverError::SerialNotActive(if_num))?;
        let len = message.len();
        queue
            .send(BufferHandle::from_vec(IfType::Serial, if_num, message), Wait::NonBlocking)
            .inspect_err(|_| log::error!("serial {if_num}: receive queue full"))?;
        log::trace!("serial {if_num}: queued {len}-byte message");

        match &conn.notify {
            Some(notify) => notify(if_num),
            None => log::debug!("serial {if_num}: no rx notify registered"),
        }
        Ok(())
    }
}

impl Transport {
    /// Registers and opens a serial connection.
    pub fn serial_init(&self, notify: Option<SerialNotify>) -> DriverResult<SerialHandle> {
        let serial = &self.inner.serial;
        let if_num = serial.register(notify)?;
        if let Err(err) = serial.open(if_num) {
            // The number is released again so a retry can claim it.
            let _ = serial.close(if_num);
            return Err(err);
        }
        log::info!("serial connection {if_num} open");
        Ok(SerialHandle {
            transport: self.clone(),
            if_num,
        })
    }

    pub fn serial_open(&self, if_num: u8) -> DriverResult<()> {
        self.inner.serial.open(if_num)
    }

    pub fn serial_state(&self, if_num: u8) -> Option<SerialState> {
        self.inner.serial.state(if_num)
    }

    /// Blocks until a message arrives or the connection is closed.
    pub fn serial_read(&self, if_num: u8) -> DriverResult<BufferHandle> {
        self.inner.serial.read(if_num, Wait::Forever)
    }

    pub fn serial_read_with(&self, if_num: u8, wait: Wait) -> DriverResult<BufferHandle> {
        self.inner.serial.read(if_num, wait)
    }

    /// Sends `data` through the registered SERIAL channel.
    pub fn serial_write(&self, if_num: u8, data: &[u8]) -> DriverResult<()> {
        if self.inner.channels.get(IfType::Serial).is_none() {
            return Err(DriverError::NotRegistered(IfType::Serial));
        }
        self.inner.serial.active(if_num)?;
        self.serial_tx(if_num, data)
    }

    pub fn serial_close(&self, if_num: u8) -> DriverResult<()> {
        self.inner.serial.close(if_num)
    }

    pub fn serial_rx_handler(&self, buf: BufferHandle) -> DriverResult<()> {
        self.inner.serial.rx_handler(buf)
    }

    /// Serial TX skips the channel pools: the bytes go out in a heap buffer.
    pub(crate) fn serial_tx(&self, if_num: u8, data: &[u8]) -> DriverResult<()> {
        self.tx(BufferHandle::from_vec(IfType::Serial, if_num, data.to_vec()))
    }
}

/// Upper-layer view of one serial connection.
#[derive(Clone)]
pub struct SerialHandle {
    transport: Transport,
    if_num: u8,
}

impl SerialHandle {
    pub fn if_num(&self) -> u8 {
        self.if_num
    }

    pub fn read(&self) -> DriverResult<BufferHandle> {
        self.transport.serial_read(self.if_num)
    }

    pub fn read_timeout(&self, timeout: Duration) -> DriverResult<BufferHandle> {
        self.transport
            .serial_read_with(self.if_num, Wait::Timeout(timeout))
    }

    pub fn try_read(&self) -> DriverResult<BufferHandle> {
        self.transport
            .serial_read_with(self.if_num, Wait::NonBlocking)
    }

    pub fn write(&self, data: &[u8]) -> DriverResult<()> {
        self.transport.serial_write(self.if_num, data)
    }

    /// Recreates the receive queue, dropping anything still pending.
    pub fn open(&self) -> DriverResult<()> {
        self.transport.serial_open(self.if_num)
    }

    pub fn close(self) -> DriverResult<()> {
        self.transport.serial_close(self.if_num)
    }
}

impl fmt::Debug for SerialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialHandle")
            .field("if_num", &self.if_num)
            .finish_non_exhaustive()
    }
}
