//! Transport layer abstraction.
//!
//! This module provides the `Transport` trait the socket engine drives. A
//! transport is an already-connected, blocking connection whose send and
//! receive calls are bounded by an absolute deadline.
//!
//! # Implementations
//!
//! - `StreamSocket`: TCP, unix and (with the `vsock` feature) vsock streams
//! - `MemoryTransport`: in-process message pipe for tests and embedding
//!
//! # Example
//!
//! ```rust,ignore
//! use xsocket::transport::{MemoryTransport, Transport};
//!
//! let (a, b) = MemoryTransport::pair();
//! a.send(b"Hello", None)?;
//! assert_eq!(b.recv(None)?, b"Hello");
//! ```

mod memory;
mod receiver;
mod stream;

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

pub use memory::MemoryTransport;
pub use receiver::{FrameReceiver, LengthPrefixedReceiver, RawReceiver, DEFAULT_RECV_BUFFER_SIZE};
pub use stream::{Stream, StreamSocket};

/// Value stored in a transport's user-data slot.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Address of one end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    /// TCP endpoint.
    Inet(SocketAddr),

    /// Unix domain socket; unnamed sockets carry no path.
    Unix(Option<PathBuf>),

    /// Vsock endpoint.
    Vsock { cid: u32, port: u32 },

    /// In-process endpoint, identified by a process-unique id.
    Memory(u64),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Inet(addr) => write!(f, "{}", addr),
            Addr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Addr::Unix(None) => write!(f, "unix:(unnamed)"),
            Addr::Vsock { cid, port } => write!(f, "vsock:{}:{}", cid, port),
            Addr::Memory(id) => write!(f, "memory:{}", id),
        }
    }
}

/// Blocking, deadline-aware connection driven by the socket engine.
///
/// `send` and `recv` are called concurrently from two different threads, so
/// both take `&self`. A `None` deadline blocks indefinitely; an elapsed
/// deadline must surface as an error classified by [`crate::io::is_timeout`].
pub trait Transport: Send + Sync + 'static {
    /// Returns the local address.
    fn local_addr(&self) -> io::Result<Addr>;

    /// Returns the remote address.
    fn remote_addr(&self) -> io::Result<Addr>;

    /// Returns the value stored with [`Transport::set_user_data`].
    fn user_data(&self) -> Option<UserData>;

    /// Stores an opaque value alongside the connection.
    fn set_user_data(&self, data: UserData);

    /// Returns the underlying connection object for downcasting.
    fn raw_conn(&self) -> &dyn Any;

    /// Closes the connection. Calling it more than once has no effect.
    fn close(&self);

    /// Wakes a receive blocked without a deadline. The engine calls this when
    /// it starts shutting down; the default does nothing.
    fn shutdown_read(&self) {}

    /// Writes all of `buf`, returning the number of bytes written.
    fn send(&self, buf: &[u8], deadline: Option<Instant>) -> io::Result<usize>;

    /// Receives the next chunk of bytes.
    fn recv(&self, deadline: Option<Instant>) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn local_addr(&self) -> io::Result<Addr> {
        (**self).local_addr()
    }

    fn remote_addr(&self) -> io::Result<Addr> {
        (**self).remote_addr()
    }

    fn user_data(&self) -> Option<UserData> {
        (**self).user_data()
    }

    fn set_user_data(&self, data: UserData) {
        (**self).set_user_data(data)
    }

    fn raw_conn(&self) -> &dyn Any {
        (**self).raw_conn()
    }

    fn close(&self) {
        (**self).close()
    }

    fn shutdown_read(&self) {
        (**self).shutdown_read()
    }

    fn send(&self, buf: &[u8], deadline: Option<Instant>) -> io::Result<usize> {
        (**self).send(buf, deadline)
    }

    fn recv(&self, deadline: Option<Instant>) -> io::Result<Vec<u8>> {
        (**self).recv(deadline)
    }
}

/// User-data slot for transport implementations.
///
/// The slot shares the stored value; it never implies ownership of it.
#[derive(Default)]
pub struct UserDataSlot {
    data: Mutex<Option<UserData>>,
}

impl UserDataSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<UserData> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, data: UserData) {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }
}

impl fmt::Debug for UserDataSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataSlot")
            .field("set", &self.get().is_some())
            .finish()
    }
}
