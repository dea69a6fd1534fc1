use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use log::*;
use xsocket::transport::{LengthPrefixedReceiver, Stream, StreamSocket};
use xsocket::{Error, Identity, LengthPrefixed, SocketBuilder, SocketConfig};

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Every packet starts with its big-endian sequence number.
const SEQ_SIZE: usize = 8;
const ECHO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum ClientTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for ClientTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("missing scheme in {:?}", s))?;
        match scheme {
            "tcp" => rest
                .parse()
                .map(ClientTarget::Tcp)
                .map_err(|e| format!("bad tcp address {:?}: {}", rest, e)),
            "unix" => Ok(ClientTarget::Unix(PathBuf::from(rest))),
            "vsock" => {
                let (cid, port) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("expected vsock:<cid>:<port>, got {:?}", s))?;
                Ok(ClientTarget::Vsock {
                    cid: cid.parse().map_err(|e| format!("bad cid {:?}: {}", cid, e))?,
                    port: port.parse().map_err(|e| format!("bad port {:?}: {}", port, e))?,
                })
            }
            _ => Err(format!("unknown scheme {:?}", scheme)),
        }
    }
}

/// Throughput figures for one echo run.
#[derive(Debug)]
pub struct EchoReport {
    pub packets: usize,
    pub bytes: usize,
    pub elapsed: Duration,
}

pub struct EchoClient {
    target: ClientTarget,
}

impl EchoClient {
    pub fn new(target: ClientTarget) -> Self {
        Self { target }
    }

    /// Sends `count` packets of `size` bytes and waits for every echo.
    pub fn run(&self, count: usize, size: usize) -> Result<EchoReport, Error> {
        info!("Connecting to target: {:?}", self.target);
        match &self.target {
            ClientTarget::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                info!("Unix socket connected.");
                Self::process_stream(stream, count, size)
            }
            ClientTarget::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_nodelay(true)?;
                info!("TCP socket connected.");
                Self::process_stream(stream, count, size)
            }
            ClientTarget::Vsock { cid, port } => {
                let stream = connect_vsock(*cid, *port)?;
                info!("Vsock socket connected.");
                Self::process_stream(stream, count, size)
            }
        }
    }

    fn process_stream<S: Stream>(stream: S, count: usize, size: usize) -> Result<EchoReport, Error> {
        let (packets_tx, packets_rx) = unbounded();
        let (closed_tx, closed_rx) = unbounded();
        let transport =
            StreamSocket::with_receiver(stream, LengthPrefixedReceiver::new(MAX_FRAME_SIZE));
        let socket = SocketBuilder::with_codec(transport, Identity, LengthPrefixed)
            .config(SocketConfig::new().with_send_queue_size(64))
            .on_packet(move |socket, packet| {
                let _ = packets_tx.send(packet);
                socket.recv(None);
            })
            .on_close(move |_, reason| {
                let _ = closed_tx.send(reason);
            })
            .build();
        socket.recv(None);

        let start = Instant::now();
        for seq in 0..count {
            let mut packet = vec![0xAB; size.max(SEQ_SIZE)];
            packet[..SEQ_SIZE].copy_from_slice(&(seq as u64).to_be_bytes());
            socket.send(packet)?;
        }
        debug!("Queued {} packets", count);

        let mut bytes = 0;
        for seq in 0..count {
            let packet = packets_rx.recv_timeout(ECHO_TIMEOUT).map_err(|_| {
                Error::with_source(
                    xsocket::ErrorKind::RecvTimeout,
                    format!("echo {} of {} not received", seq, count),
                )
            })?;
            if packet.get(..SEQ_SIZE) != Some(&(seq as u64).to_be_bytes()[..]) {
                warn!("Echo {} arrived out of order", seq);
            }
            bytes += packet.len();
        }
        let elapsed = start.elapsed();

        socket.close(None);
        match closed_rx.recv_timeout(ECHO_TIMEOUT) {
            Ok(Some(reason)) => warn!("Socket closed with error: {}", reason),
            Ok(None) => debug!("Socket closed"),
            Err(_) => warn!("Socket did not close in time"),
        }

        Ok(EchoReport {
            packets: count,
            bytes,
            elapsed,
        })
    }
}

#[cfg(target_os = "linux")]
fn connect_vsock(cid: u32, port: u32) -> io::Result<vsock::VsockStream> {
    vsock::VsockStream::connect(&vsock::VsockAddr::new(cid, port))
}

#[cfg(not(target_os = "linux"))]
fn connect_vsock(_cid: u32, _port: u32) -> io::Result<TcpStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "vsock is only available on linux",
    ))
}
