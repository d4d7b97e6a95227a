//! Bounded multi-producer/multi-consumer queue with the three waiting modes
//! the link layer relies on.

use crate::wait::Wait;
use crate::{TransportError, TransportResult};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};

/// Cloneable handle onto one bounded queue; every clone shares the storage.
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    depth: usize,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            depth: self.depth,
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("depth", &self.depth)
            .field("len", &self.rx.len())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(depth: usize) -> TransportResult<Self> {
        if depth == 0 {
            return Err(TransportError::InvalidCapacity {
                requested: 0,
                minimum: 1,
            });
        }
        let (tx, rx) = bounded(depth);
        Ok(Self { tx, rx, depth })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Enqueues `item`; the item is dropped when the queue refuses it.
    pub fn send(&self, item: T, wait: Wait) -> TransportResult<()> {
        match wait {
            Wait::NonBlocking => self.tx.try_send(item).map_err(|err| match err {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Disconnected(_) => TransportError::Disconnected,
            }),
            Wait::Forever => self
                .tx
                .send(item)
                .map_err(|_| TransportError::Disconnected),
            Wait::Timeout(limit) => self.tx.send_timeout(item, limit).map_err(|err| match err {
                SendTimeoutError::Timeout(_) => TransportError::TimedOut,
                SendTimeoutError::Disconnected(_) => TransportError::Disconnected,
            }),
        }
    }

    /// Dequeues the oldest item.
    pub fn recv(&self, wait: Wait) -> TransportResult<T> {
        match wait {
            Wait::NonBlocking => self.rx.try_recv().map_err(|err| match err {
                TryRecvError::Empty => TransportError::QueueEmpty,
                TryRecvError::Disconnected => TransportError::Disconnected,
            }),
            Wait::Forever => self.rx.recv().map_err(|_| TransportError::Disconnected),
            Wait::Timeout(limit) => self.rx.recv_timeout(limit).map_err(|err| match err {
                RecvTimeoutError::Timeout => TransportError::TimedOut,
                RecvTimeoutError::Disconnected => TransportError::Disconnected,
            }),
        }
    }

    /// Drops every queued item. Returns how many were discarded.
    pub fn reset(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn non_blocking_reports_full_and_empty() {
        let queue = BoundedQueue::new(2).expect("queue");
        queue.send(1, Wait::NonBlocking).expect("send");
        queue.send(2, Wait::NonBlocking).expect("send");
        assert_eq!(queue.send(3, Wait::NonBlocking), Err(TransportError::QueueFull));
        assert_eq!(queue.recv(Wait::NonBlocking), Ok(1));
        assert_eq!(queue.recv(Wait::NonBlocking), Ok(2));
        assert_eq!(queue.recv(Wait::NonBlocking), Err(TransportError::QueueEmpty));
    }

    #[test]
    fn timed_recv_waits_for_deadline() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1).expect("queue");
        let start = Instant::now();
        assert_eq!(
            queue.recv(Wait::Timeout(Duration::from_millis(15))),
            Err(TransportError::TimedOut)
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn blocking_recv_sees_item_from_clone() {
        let queue = BoundedQueue::new(4).expect("queue");
        let producer = queue.clone();
        let handle = thread::spawn(move || producer.send(7u32, Wait::Forever));
        assert_eq!(queue.recv(Wait::Forever), Ok(7));
        handle.join().unwrap().expect("send");
    }

    #[test]
    fn reset_discards_pending_items() {
        let queue = BoundedQueue::new(3).expect("queue");
        for i in 0..3 {
            queue.send(i, Wait::NonBlocking).expect("send");
        }
        assert_eq!(queue.reset(), 3);
        assert!(queue.is_empty());
        assert!(BoundedQueue::<u8>::new(0).is_err());
    }
}
