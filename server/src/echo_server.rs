use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::*;
use tokio::net::{TcpListener, UnixListener};
use xsocket::transport::{LengthPrefixedReceiver, Stream, StreamSocket};
use xsocket::{AsyncSocket, Identity, LengthPrefixed, SocketBuilder, SocketConfig};

/// Largest echoed packet.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub enum ServerTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for ServerTarget {
    type Err = String;

    /// Parses `tcp:<addr>`, `unix:<path>` or `vsock:<cid>:<port>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("missing scheme in {:?}", s))?;
        match scheme {
            "tcp" => rest
                .parse()
                .map(ServerTarget::Tcp)
                .map_err(|e| format!("bad tcp address {:?}: {}", rest, e)),
            "unix" => Ok(ServerTarget::Unix(PathBuf::from(rest))),
            "vsock" => {
                let (cid, port) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("expected vsock:<cid>:<port>, got {:?}", s))?;
                Ok(ServerTarget::Vsock {
                    cid: cid.parse().map_err(|e| format!("bad cid {:?}: {}", cid, e))?,
                    port: port.parse().map_err(|e| format!("bad port {:?}: {}", port, e))?,
                })
            }
            _ => Err(format!("unknown scheme {:?}", scheme)),
        }
    }
}

type Sessions = Arc<Mutex<HashMap<u64, AsyncSocket<Vec<u8>>>>>;

/// Accepts connections and echoes every packet back on its own socket.
pub struct EchoServer {
    target: ServerTarget,
    sessions: Sessions,
    next_id: AtomicU64,
}

impl EchoServer {
    pub fn new(target: ServerTarget) -> Self {
        Self {
            target,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs the accept loop until an accept fails.
    pub async fn run(&self) -> io::Result<()> {
        match &self.target {
            ServerTarget::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                info!("Server listening on Unix Socket {:?}", path);
                loop {
                    let (stream, _) = listener.accept().await?;
                    info!("Accepted Unix connection");
                    let stream = stream.into_std()?;
                    stream.set_nonblocking(false)?;
                    self.serve(stream);
                }
            }
            ServerTarget::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Server listening on TCP {:?}", addr);
                loop {
                    let (stream, peer) = listener.accept().await?;
                    info!("Accepted TCP connection from {:?}", peer);
                    let stream = stream.into_std()?;
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    self.serve(stream);
                }
            }
            ServerTarget::Vsock { cid, port } => self.run_vsock(*cid, *port).await,
        }
    }

    #[cfg(target_os = "linux")]
    async fn run_vsock(&self, cid: u32, port: u32) -> io::Result<()> {
        use vsock::{VsockAddr, VsockListener};

        let listener = Arc::new(VsockListener::bind(&VsockAddr::new(cid, port))?);
        info!("Server listening on Vsock CID:{} Port:{}", cid, port);
        loop {
            let listener = listener.clone();
            let (stream, addr) = tokio::task::spawn_blocking(move || listener.accept())
                .await
                .map_err(io::Error::other)??;
            info!("Accepted Vsock connection from {:?}", addr);
            self.serve(stream);
        }
    }

    #[cfg(not(target_os = "linux"))]
    async fn run_vsock(&self, _cid: u32, _port: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only available on linux",
        ))
    }

    fn serve<S: Stream>(&self, stream: S) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sessions = self.sessions.clone();
        let transport =
            StreamSocket::with_receiver(stream, LengthPrefixedReceiver::new(MAX_FRAME_SIZE));
        let socket = SocketBuilder::with_codec(transport, Identity, LengthPrefixed)
            .config(SocketConfig::new().with_send_queue_size(64))
            .on_packet(|socket, packet| {
                trace!("Echoing {} bytes", packet.len());
                if let Err(e) = socket.send(packet) {
                    debug!("Echo failed: {}", e);
                    return;
                }
                socket.recv(None);
            })
            .on_close(move |_, reason| {
                sessions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                match reason {
                    Some(e) => info!("Session {} closed: {}", id, e),
                    None => info!("Session {} closed", id),
                }
            })
            .build();

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, socket.clone());
        info!("Session {} started, remote {:?}", id, socket.remote_addr().ok());
        socket.recv(None);
    }

    /// Closes every live session; queued echoes are still flushed.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        info!("Closing {} sessions", sessions.len());
        for socket in sessions {
            socket.close(None);
        }
    }
}
