//! In-process message transport.
//!
//! Each `send` is delivered to the peer as exactly one message, the way a
//! message-oriented connection (websocket, datagram session) behaves.

use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crossbeam_channel::{at, bounded, never, select, unbounded, Receiver, Sender};

use super::{Addr, Transport, UserData, UserDataSlot};
use crate::io::deadline_elapsed;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One end of an in-process connection.
///
/// Data written is delivered to the other end of the pair. Closing one end
/// makes the peer's `recv` fail once the messages already delivered are
/// consumed.
#[derive(Debug)]
pub struct MemoryTransport {
    /// Local endpoint id.
    id: u64,

    /// Peer endpoint id.
    peer_id: u64,

    /// Outgoing messages; dropped on close so the peer sees end of stream.
    tx: Mutex<Option<Sender<Vec<u8>>>>,

    /// Incoming messages.
    rx: Receiver<Vec<u8>>,

    /// Dropped to wake a blocked `recv`.
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,

    closed: AtomicBool,
    user_data: UserDataSlot,

    /// Successful send calls.
    send_calls: AtomicUsize,

    /// Bytes accepted by successful send calls.
    bytes_sent: AtomicUsize,
}

impl MemoryTransport {
    /// Creates a connected pair with unbounded queues.
    pub fn pair() -> (Self, Self) {
        Self::from_channels(unbounded(), unbounded())
    }

    /// Creates a connected pair where each direction holds at most
    /// `capacity` undelivered messages; further sends block.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        Self::from_channels(bounded(capacity), bounded(capacity))
    }

    fn from_channels(
        (a_tx, b_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>),
        (b_tx, a_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    ) -> (Self, Self) {
        let a_id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let b_id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        (
            Self::new(a_id, b_id, a_tx, a_rx),
            Self::new(b_id, a_id, b_tx, b_rx),
        )
    }

    fn new(id: u64, peer_id: u64, tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        let (wake_tx, wake_rx) = bounded(0);
        Self {
            id,
            peer_id,
            tx: Mutex::new(Some(tx)),
            rx,
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx,
            closed: AtomicBool::new(false),
            user_data: UserDataSlot::new(),
            send_calls: AtomicUsize::new(0),
            bytes_sent: AtomicUsize::new(0),
        }
    }

    /// Returns the number of successful send calls.
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::Acquire)
    }

    /// Returns the number of bytes written by successful send calls.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::Acquire)
    }

    /// Returns true once `close` has been called on this end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn sender(&self) -> Option<Sender<Vec<u8>>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn wake_reader(&self) {
        self.wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> io::Result<Addr> {
        Ok(Addr::Memory(self.id))
    }

    fn remote_addr(&self) -> io::Result<Addr> {
        Ok(Addr::Memory(self.peer_id))
    }

    fn user_data(&self) -> Option<UserData> {
        self.user_data.get()
    }

    fn set_user_data(&self, data: UserData) {
        self.user_data.set(data)
    }

    fn raw_conn(&self) -> &dyn Any {
        self
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.wake_reader();
    }

    fn shutdown_read(&self) {
        self.wake_reader();
    }

    fn send(&self, buf: &[u8], deadline: Option<Instant>) -> io::Result<usize> {
        let Some(tx) = self.sender() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let timer = deadline.map(at).unwrap_or_else(never);
        select! {
            send(tx, buf.to_vec()) -> res => {
                res.map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
                self.send_calls.fetch_add(1, Ordering::AcqRel);
                self.bytes_sent.fetch_add(buf.len(), Ordering::AcqRel);
                Ok(buf.len())
            }
            recv(timer) -> _ => Err(deadline_elapsed()),
        }
    }

    fn recv(&self, deadline: Option<Instant>) -> io::Result<Vec<u8>> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let timer = deadline.map(at).unwrap_or_else(never);
        select! {
            recv(self.rx) -> msg => msg.map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof)),
            recv(self.wake_rx) -> _ => Err(io::ErrorKind::ConnectionAborted.into()),
            recv(timer) -> _ => Err(deadline_elapsed()),
        }
    }
}
