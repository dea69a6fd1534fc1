//! Byte-stream transport adapter.
//!
//! Wraps a connected std stream (TCP, unix, vsock) into a [`Transport`].
//! Deadlines are applied per call through the stream's read/write timeouts.

use std::any::Any;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::receiver::{FrameReceiver, RawReceiver};
use super::{Addr, Transport, UserData, UserDataSlot};
use crate::io::timeout_until;

/// Connected byte stream usable from two threads at once.
pub trait Stream: Send + Sync + 'static {
    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_some(&self, buf: &[u8]) -> io::Result<usize>;
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
    fn local_addr(&self) -> io::Result<Addr>;
    fn peer_addr(&self) -> io::Result<Addr>;
}

impl Stream for TcpStream {
    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }

    fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.write(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<Addr> {
        TcpStream::local_addr(self).map(Addr::Inet)
    }

    fn peer_addr(&self) -> io::Result<Addr> {
        TcpStream::peer_addr(self).map(Addr::Inet)
    }
}

#[cfg(unix)]
impl Stream for UnixStream {
    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }

    fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.write(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        UnixStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<Addr> {
        UnixStream::local_addr(self).map(|addr| Addr::Unix(addr.as_pathname().map(Into::into)))
    }

    fn peer_addr(&self) -> io::Result<Addr> {
        UnixStream::peer_addr(self).map(|addr| Addr::Unix(addr.as_pathname().map(Into::into)))
    }
}

#[cfg(all(target_os = "linux", feature = "vsock"))]
impl Stream for vsock::VsockStream {
    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }

    fn write_some(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.write(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        vsock::VsockStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        vsock::VsockStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        vsock::VsockStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<Addr> {
        vsock::VsockStream::local_addr(self).map(|addr| Addr::Vsock {
            cid: addr.cid(),
            port: addr.port(),
        })
    }

    fn peer_addr(&self) -> io::Result<Addr> {
        vsock::VsockStream::peer_addr(self).map(|addr| Addr::Vsock {
            cid: addr.cid(),
            port: addr.port(),
        })
    }
}

/// Adapts a `&Stream` to `io::Read` for frame receivers.
///
/// With a deadline, the read timeout is recomputed before every read so a
/// frame assembled from many reads still ends at the deadline.
struct StreamReader<'a, S: Stream> {
    stream: &'a S,
    deadline: Option<Instant>,
}

impl<S: Stream> Read for StreamReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.deadline.is_some() {
            self.stream.set_read_timeout(timeout_until(self.deadline)?)?;
        }
        self.stream.read_into(buf)
    }
}

/// [`Transport`] over a connected byte stream.
///
/// # Example
///
/// ```rust,ignore
/// use std::net::TcpStream;
/// use xsocket::transport::{LengthPrefixedReceiver, StreamSocket};
///
/// let stream = TcpStream::connect("127.0.0.1:8110")?;
/// let transport = StreamSocket::with_receiver(stream, LengthPrefixedReceiver::new(65536));
/// ```
#[derive(Debug)]
pub struct StreamSocket<S: Stream, R: FrameReceiver = RawReceiver> {
    stream: S,

    /// Only the receiving thread locks this.
    receiver: Mutex<R>,

    user_data: UserDataSlot,
    closed: AtomicBool,
}

impl<S: Stream> StreamSocket<S, RawReceiver> {
    pub fn new(stream: S) -> Self {
        Self::with_receiver(stream, RawReceiver::new())
    }
}

impl<S: Stream, R: FrameReceiver> StreamSocket<S, R> {
    pub fn with_receiver(stream: S, receiver: R) -> Self {
        Self {
            stream,
            receiver: Mutex::new(receiver),
            user_data: UserDataSlot::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the wrapped stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<S: Stream, R: FrameReceiver> Transport for StreamSocket<S, R> {
    fn local_addr(&self) -> io::Result<Addr> {
        self.stream.local_addr()
    }

    fn remote_addr(&self) -> io::Result<Addr> {
        self.stream.peer_addr()
    }

    fn user_data(&self) -> Option<UserData> {
        self.user_data.get()
    }

    fn set_user_data(&self, data: UserData) {
        self.user_data.set(data)
    }

    fn raw_conn(&self) -> &dyn Any {
        &self.stream
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::trace!("Stream shutdown failed: {}", e);
        }
    }

    fn shutdown_read(&self) {
        let _ = self.stream.shutdown(Shutdown::Read);
    }

    fn send(&self, buf: &[u8], deadline: Option<Instant>) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if deadline.is_none() {
            self.stream.set_write_timeout(None)?;
        }
        let mut written = 0;
        while written < buf.len() {
            if deadline.is_some() {
                self.stream.set_write_timeout(timeout_until(deadline)?)?;
            }
            match self.stream.write_some(&buf[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn recv(&self, deadline: Option<Instant>) -> io::Result<Vec<u8>> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        // fail an elapsed deadline before touching the socket
        timeout_until(deadline)?;
        if deadline.is_none() {
            self.stream.set_read_timeout(None)?;
        }
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        receiver.recv_frame(&mut StreamReader {
            stream: &self.stream,
            deadline,
        })
    }
}
