//! Asynchronous socket engine.
//!
//! An [`AsyncSocket`] owns one connected [`Transport`] and drives it with two
//! background threads started on first use:
//!
//! - the receive task serves receive requests queued by [`AsyncSocket::recv`]
//!   and hands decoded packets to the packet handler
//! - the send task drains the send queue, packs objects into the accumulation
//!   buffer and flushes it to the transport
//!
//! The tasks share nothing but the shutdown signal, their request queues, the
//! active-task counter and the close-reason slot.
//!
//! ## Close protocol
//!
//! `close` broadcasts the shutdown signal exactly once. Each task decrements
//! the active-task counter on exit, and whoever brings it to zero finalizes
//! the socket: the transport is closed and the close callback runs with the
//! recorded reason. `close` raises the counter around the broadcast so that a
//! socket whose tasks are still starting cannot finalize early.

mod builder;
mod receiver;
mod sender;

use std::io;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock, PoisonError};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, warn};

use crate::buffer::PackBuffer;
use crate::codec::{Decoder, Packer};
use crate::config::SocketConfig;
use crate::error::Error;
use crate::transport::{Addr, Transport, UserData};

pub use builder::SocketBuilder;

/// Called once when the socket is finalized, with the recorded close reason.
pub type CloseCallback<P> = Box<dyn Fn(&AsyncSocket<P>, Option<Error>) + Send + Sync>;

/// Called on the receive task when a receive deadline elapses.
pub type RecvTimeoutCallback<P> = Box<dyn Fn(&AsyncSocket<P>) + Send + Sync>;

/// Called on the receive task for every decoded packet.
pub type PacketHandler<P> = Box<dyn Fn(&AsyncSocket<P>, P) + Send + Sync>;

/// Socket lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Socket is open and operational.
    Open,

    /// Shutdown was signaled; tasks are exiting.
    Closing,

    /// Transport closed and close callback invoked.
    Closed,
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Packer and buffer, moved into the send task when it starts.
struct SendHalf<P> {
    packer: Box<dyn Packer<P>>,
    buffer: Box<dyn PackBuffer>,
}

struct Shared<P> {
    transport: Box<dyn Transport>,
    decoder: Box<dyn Decoder<P>>,
    send_half: Mutex<Option<SendHalf<P>>>,
    config: SocketConfig,

    /// Never sent on; dropping the sender broadcasts shutdown.
    die_tx: Mutex<Option<Sender<()>>>,
    die_rx: Receiver<()>,

    /// Single-slot pending receive request.
    recv_req_tx: Sender<Option<Instant>>,
    recv_req_rx: Receiver<Option<Instant>>,

    send_req_tx: Sender<P>,
    send_req_rx: Receiver<P>,

    recv_once: Once,
    send_once: Once,
    close_once: Once,
    finalize_once: Once,

    /// Running tasks, plus one while `close` broadcasts.
    routine_count: AtomicI32,
    close_reason: OnceLock<Error>,
    state: AtomicU8,

    on_close: CloseCallback<P>,
    on_recv_timeout: RecvTimeoutCallback<P>,
    on_packet: PacketHandler<P>,
}

/// Asynchronous packet-oriented handle over a [`Transport`].
///
/// Handles are cheap to clone; all clones drive the same connection.
///
/// # Example
///
/// ```rust,ignore
/// use xsocket::{AsyncSocket, transport::MemoryTransport};
///
/// let (a, b) = MemoryTransport::pair();
/// let socket = AsyncSocket::builder(a)
///     .on_packet(|socket, packet| {
///         println!("received {} bytes", packet.len());
///         socket.recv(None);
///     })
///     .build();
/// socket.recv(None);
/// socket.send(b"hello".to_vec())?;
/// ```
pub struct AsyncSocket<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for AsyncSocket<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl AsyncSocket<Vec<u8>> {
    /// Starts building a byte socket using the identity codec.
    pub fn builder<T: Transport>(transport: T) -> SocketBuilder<Vec<u8>> {
        SocketBuilder::new(transport)
    }
}

impl<P: Send + 'static> AsyncSocket<P> {
    fn from_parts(
        transport: Box<dyn Transport>,
        decoder: Box<dyn Decoder<P>>,
        send_half: SendHalf<P>,
        config: SocketConfig,
        on_close: CloseCallback<P>,
        on_recv_timeout: RecvTimeoutCallback<P>,
        on_packet: PacketHandler<P>,
    ) -> Self {
        let (die_tx, die_rx) = bounded(0);
        let (recv_req_tx, recv_req_rx) = bounded(1);
        let (send_req_tx, send_req_rx) = bounded(config.send_queue_size.max(1));
        Self {
            shared: Arc::new(Shared {
                transport,
                decoder,
                send_half: Mutex::new(Some(send_half)),
                config,
                die_tx: Mutex::new(Some(die_tx)),
                die_rx,
                recv_req_tx,
                recv_req_rx,
                send_req_tx,
                send_req_rx,
                recv_once: Once::new(),
                send_once: Once::new(),
                close_once: Once::new(),
                finalize_once: Once::new(),
                routine_count: AtomicI32::new(0),
                close_reason: OnceLock::new(),
                state: AtomicU8::new(STATE_OPEN),
                on_close,
                on_recv_timeout,
                on_packet,
            }),
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &dyn Transport {
        self.shared.transport.as_ref()
    }

    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    pub fn local_addr(&self) -> io::Result<Addr> {
        self.shared.transport.local_addr()
    }

    pub fn remote_addr(&self) -> io::Result<Addr> {
        self.shared.transport.remote_addr()
    }

    pub fn user_data(&self) -> Option<UserData> {
        self.shared.transport.user_data()
    }

    pub fn set_user_data(&self, data: UserData) {
        self.shared.transport.set_user_data(data)
    }

    /// Returns the connection object wrapped by the transport.
    pub fn raw_conn(&self) -> &dyn std::any::Any {
        self.shared.transport.raw_conn()
    }

    pub fn state(&self) -> SocketState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_OPEN => SocketState::Open,
            STATE_CLOSING => SocketState::Closing,
            _ => SocketState::Closed,
        }
    }

    /// Returns true once shutdown has been signaled.
    pub fn is_closed(&self) -> bool {
        self.state() != SocketState::Open
    }

    /// Shuts the socket down.
    ///
    /// Safe to call any number of times from any thread. The first error
    /// passed to any call is the reason reported to the close callback; `None`
    /// means a graceful shutdown. Never blocks on the tasks: finalization runs
    /// on whichever task exits last, or on a helper thread if none is running.
    pub fn close(&self, reason: Option<Error>) {
        let shared = &*self.shared;
        if let Some(err) = reason {
            let _ = shared.close_reason.set(err);
        }
        shared.close_once.call_once(|| {
            // Keep the counter above zero while broadcasting so a task that is
            // still starting cannot finalize.
            shared.routine_count.fetch_add(1, Ordering::AcqRel);
            shared.state.store(STATE_CLOSING, Ordering::Release);
            shared
                .die_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            shared.transport.shutdown_read();
            debug!("Socket closing, reason: {:?}", shared.close_reason.get());
            if shared.routine_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.schedule_finalize();
            }
        });
    }

    fn schedule_finalize(&self) {
        let socket = self.clone();
        let spawned = thread::Builder::new()
            .name("xsocket-close".into())
            .spawn(move || socket.finalize());
        if let Err(e) = spawned {
            warn!("Failed to spawn close thread: {}", e);
            self.finalize();
        }
    }

    fn finalize(&self) {
        let shared = &*self.shared;
        shared.finalize_once.call_once(|| {
            shared.transport.close();
            shared.state.store(STATE_CLOSED, Ordering::Release);
            let reason = shared.close_reason.get().cloned();
            debug!("Socket closed, reason: {:?}", reason);
            (shared.on_close)(self, reason);
        });
    }

    fn is_shutdown(&self) -> bool {
        matches!(
            self.shared.die_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }

    /// Starts a background task running `body`.
    fn start_task(&self, name: &str, body: fn(&AsyncSocket<P>)) {
        self.shared.routine_count.fetch_add(1, Ordering::AcqRel);
        let socket = self.clone();
        let task = name.to_string();
        let spawned = thread::Builder::new().name(name.into()).spawn(move || {
            let _exit = TaskExit(&socket);
            debug!("{} started", task);
            body(&socket);
            debug!("{} exiting", task);
        });
        if let Err(e) = spawned {
            warn!("Failed to spawn {}: {}", name, e);
            self.close(Some(e.into()));
            self.task_exited();
        }
    }

    fn task_exited(&self) {
        if self.shared.routine_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finalize();
        }
    }
}

/// Decrements the active-task counter when a task ends, even by panic.
struct TaskExit<'a, P: Send + 'static>(&'a AsyncSocket<P>);

impl<P: Send + 'static> Drop for TaskExit<'_, P> {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("Socket task panicked, closing");
            self.0.close(None);
        }
        self.0.task_exited();
    }
}
