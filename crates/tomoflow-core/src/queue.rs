//! Bounded handoff between the ingest thread and the scheduler.
//!
//! A thin wrapper over a `crossbeam-channel` bounded channel. Blocking calls
//! wake every [`CANCEL_POLL_INTERVAL`] to observe the cancellation token, so a
//! stalled peer never keeps a cancelled run alive.

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, TrySendError};

use crate::cancel::{CancellationToken, CANCEL_POLL_INTERVAL};
use crate::error::{Error, Result};

/// Create a bounded work queue.
///
/// A capacity of zero is bumped to one; a rendezvous channel would make
/// `try_send` fail whenever the scheduler is not parked in `recv`.
pub fn work_queue<T>(capacity: usize) -> (WorkSender<T>, WorkReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        WorkSender { tx, capacity },
        WorkReceiver { rx, capacity },
    )
}

/// Producer half of the work queue.
#[derive(Debug)]
pub struct WorkSender<T> {
    tx: crossbeam_channel::Sender<T>,
    capacity: usize,
}

impl<T> Clone for WorkSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> WorkSender<T> {
    /// Enqueue without blocking.
    ///
    /// Returns the item together with `QueueFull` when at capacity, so the
    /// caller can retry it later.
    pub fn try_send(&self, item: T) -> std::result::Result<(), (T, Error)> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err((
                item,
                Error::QueueFull {
                    capacity: self.capacity,
                },
            )),
            Err(TrySendError::Disconnected(item)) => Err((item, Error::QueueClosed)),
        }
    }

    /// Enqueue, blocking while the queue is full.
    pub fn send(&self, mut item: T, cancel: &CancellationToken) -> Result<()> {
        loop {
            cancel.check()?;
            match self.tx.send_timeout(item, CANCEL_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(Error::QueueClosed),
            }
        }
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer half of the work queue.
#[derive(Debug)]
pub struct WorkReceiver<T> {
    rx: crossbeam_channel::Receiver<T>,
    capacity: usize,
}

impl<T> WorkReceiver<T> {
    /// Dequeue, blocking while the queue is empty.
    pub fn recv(&self, cancel: &CancellationToken) -> Result<T> {
        loop {
            cancel.check()?;
            match self.rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(item) => return Ok(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::QueueClosed),
            }
        }
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = work_queue(4);
        let cancel = CancellationToken::new();
        for i in 0..4 {
            tx.send(i, &cancel).unwrap();
        }
        assert_eq!(rx.len(), 4);
        for i in 0..4 {
            assert_eq!(rx.recv(&cancel).unwrap(), i);
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_try_send_backpressure() {
        let (tx, _rx) = work_queue(2);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        let (item, err) = tx.try_send(3).unwrap_err();
        assert_eq!(item, 3);
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
    }

    #[test]
    fn test_blocking_send_resumes_after_recv() {
        let (tx, rx) = work_queue(1);
        let cancel = CancellationToken::new();
        tx.send(0u32, &cancel).unwrap();

        let producer = {
            let cancel = cancel.clone();
            thread::spawn(move || tx.send(1, &cancel))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rx.recv(&cancel).unwrap(), 0);
        producer.join().unwrap().unwrap();
        assert_eq!(rx.recv(&cancel).unwrap(), 1);
    }

    #[test]
    fn test_disconnect_reports_closed() {
        let (tx, rx) = work_queue::<u8>(4);
        drop(tx);
        let err = rx.recv(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::QueueClosed));

        let (tx, rx) = work_queue::<u8>(4);
        drop(rx);
        assert!(matches!(tx.try_send(1).unwrap_err().1, Error::QueueClosed));
    }

    #[test]
    fn test_cancel_unblocks_recv() {
        let (_tx, rx) = work_queue::<u8>(4);
        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let waiter = thread::spawn(move || rx.recv(&remote));
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        assert!(waiter.join().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_unblocks_full_send() {
        let (tx, _rx) = work_queue(1);
        let cancel = CancellationToken::new();
        tx.send(0u8, &cancel).unwrap();
        let remote = cancel.clone();
        let waiter = thread::spawn(move || tx.send(1, &remote));
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        assert!(waiter.join().unwrap().unwrap_err().is_cancelled());
    }
}
