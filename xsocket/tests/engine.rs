//! Engine behavior over in-process transports.

use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, unbounded, Receiver, Sender};
use xsocket::transport::{Addr, MemoryTransport, UserData};
use xsocket::{
    AsyncSocket, Decoder, Error, ErrorKind, Identity, Packer, SocketBuilder, SocketConfig,
    SocketState, Transport,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Packer whose first call blocks until the gate opens, so tests can queue
/// objects while the send task is known to be busy.
struct GatedPacker {
    gate: Option<Receiver<()>>,
    entered: Sender<()>,
}

impl GatedPacker {
    /// Returns the packer, a sender that opens the gate when dropped, and a
    /// receiver signaled when the first pack starts.
    fn new() -> (Self, Sender<()>, Receiver<()>) {
        let (gate_tx, gate_rx) = bounded(0);
        let (entered_tx, entered_rx) = unbounded();
        (
            Self {
                gate: Some(gate_rx),
                entered: entered_tx,
            },
            gate_tx,
            entered_rx,
        )
    }
}

impl Packer<Vec<u8>> for GatedPacker {
    fn pack(&mut self, buf: Vec<u8>, packet: Vec<u8>) -> xsocket::Result<Vec<u8>> {
        if let Some(gate) = self.gate.take() {
            let _ = self.entered.send(());
            let _ = gate.recv();
        }
        Identity.pack(buf, packet)
    }
}

/// Transport whose receives block until the gate opens.
///
/// Shutdown does not interrupt a held receive, so data that arrives while
/// the socket closes is still returned to the receive task.
struct GatedTransport {
    inner: MemoryTransport,
    gate: Receiver<()>,
    entered: Sender<()>,
}

impl Transport for GatedTransport {
    fn local_addr(&self) -> io::Result<Addr> {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> io::Result<Addr> {
        self.inner.remote_addr()
    }

    fn user_data(&self) -> Option<UserData> {
        self.inner.user_data()
    }

    fn set_user_data(&self, data: UserData) {
        self.inner.set_user_data(data)
    }

    fn raw_conn(&self) -> &dyn Any {
        &self.inner
    }

    fn close(&self) {
        self.inner.close()
    }

    fn send(&self, buf: &[u8], deadline: Option<Instant>) -> io::Result<usize> {
        self.inner.send(buf, deadline)
    }

    fn recv(&self, deadline: Option<Instant>) -> io::Result<Vec<u8>> {
        let _ = self.entered.send(());
        let _ = self.gate.recv();
        self.inner.recv(deadline)
    }
}

/// Packer rejecting packets that start with `!`.
struct StrictPacker;

impl Packer<Vec<u8>> for StrictPacker {
    fn pack(&mut self, buf: Vec<u8>, packet: Vec<u8>) -> xsocket::Result<Vec<u8>> {
        if packet.first() == Some(&b'!') {
            return Err(Error::encode("packet starts with '!'"));
        }
        Identity.pack(buf, packet)
    }
}

/// Decoder rejecting payloads that start with `!`.
struct StrictDecoder;

impl Decoder<Vec<u8>> for StrictDecoder {
    fn decode(&self, buf: &[u8]) -> xsocket::Result<Vec<u8>> {
        if buf.first() == Some(&b'!') {
            return Err(Error::decode("payload starts with '!'"));
        }
        Ok(buf.to_vec())
    }
}

type CloseLog = (Arc<AtomicUsize>, Receiver<Option<Error>>);

fn close_recorder<P: Send + 'static>(
    builder: SocketBuilder<P>,
) -> (SocketBuilder<P>, CloseLog) {
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = unbounded();
    let counter = calls.clone();
    let builder = builder.on_close(move |_, reason| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(reason);
    });
    (builder, (calls, rx))
}

/// Reads messages until the peer closes and returns them concatenated.
fn read_to_end(peer: &MemoryTransport) -> Vec<u8> {
    let mut out = Vec::new();
    while let Ok(msg) = peer.recv(Some(Instant::now() + WAIT)) {
        out.extend_from_slice(&msg);
    }
    out
}

#[test]
fn test_concurrent_close_calls_back_once() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (builder, (calls, closed)) = close_recorder(AsyncSocket::builder(a));
    let socket = builder.build();

    // both tasks running
    socket.recv(None);
    socket.send(b"hello".to_vec()).unwrap();
    assert_eq!(b.recv(Some(Instant::now() + WAIT)).unwrap(), b"hello");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let socket = socket.clone();
            thread::spawn(move || {
                let reason = if i % 2 == 0 {
                    Some(Error::new(ErrorKind::SendTimeout))
                } else {
                    Some(Error::new(ErrorKind::Cancelled))
                };
                socket.close(reason);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reason = closed.recv_timeout(WAIT).unwrap().unwrap();
    assert!(matches!(
        reason.kind(),
        ErrorKind::SendTimeout | ErrorKind::Cancelled
    ));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(socket.state(), SocketState::Closed);
}

#[test]
fn test_second_pending_recv_is_dropped() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let (entered_tx, entered_rx) = unbounded();
    let transport = GatedTransport {
        inner: a,
        gate: gate_rx,
        entered: entered_tx,
    };

    let (packets_tx, packets_rx) = unbounded();
    let socket = SocketBuilder::new(transport)
        .on_packet(move |_, packet| {
            let _ = packets_tx.send(packet);
        })
        .build();

    for msg in [&b"one"[..], b"two", b"three"] {
        b.send(msg, None).unwrap();
    }

    socket.recv(None);
    entered_rx.recv_timeout(WAIT).unwrap();

    // the task is blocked in the transport: one request fits, the next is dropped
    socket.recv(None);
    socket.recv(None);
    drop(gate_tx);

    assert_eq!(packets_rx.recv_timeout(WAIT).unwrap(), b"one");
    assert_eq!(packets_rx.recv_timeout(WAIT).unwrap(), b"two");
    assert!(packets_rx.recv_timeout(Duration::from_millis(200)).is_err());

    socket.close(None);
}

#[test]
fn test_full_queue_rejects_non_blocking_send() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (packer, gate, entered) = GatedPacker::new();
    let socket = SocketBuilder::with_codec(a, Identity, packer).build();

    socket.send(b"first".to_vec()).unwrap();
    entered.recv_timeout(WAIT).unwrap();
    // fills the single queue slot
    socket.send(b"second".to_vec()).unwrap();

    let err = socket.try_send(b"third".to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SendTimeout);

    let start = Instant::now();
    let err = socket
        .send_deadline(b"third".to_vec(), Instant::now() + Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SendTimeout);
    assert!(start.elapsed() >= Duration::from_millis(50));

    drop(gate);
    socket.send(b"third".to_vec()).unwrap();
    socket.close(None);
    assert_eq!(read_to_end(&b), b"firstsecondthird");
}

#[test]
fn test_send_blocks_until_queue_drains() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (packer, gate, entered) = GatedPacker::new();
    let socket = SocketBuilder::with_codec(a, Identity, packer).build();

    socket.send(b"first".to_vec()).unwrap();
    entered.recv_timeout(WAIT).unwrap();
    socket.send(b"second".to_vec()).unwrap();

    let (done_tx, done_rx) = bounded(1);
    let sender = {
        let socket = socket.clone();
        thread::spawn(move || {
            let _ = done_tx.send(socket.send(b"third".to_vec()));
        })
    };
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

    drop(gate);
    assert!(done_rx.recv_timeout(WAIT).unwrap().is_ok());
    sender.join().unwrap();

    socket.close(None);
    assert_eq!(read_to_end(&b), b"firstsecondthird");
}

#[test]
fn test_send_with_cancel() {
    init_logger();
    let (a, _b) = MemoryTransport::pair();
    let (packer, gate, entered) = GatedPacker::new();
    let socket = SocketBuilder::with_codec(a, Identity, packer).build();

    socket.send(b"first".to_vec()).unwrap();
    entered.recv_timeout(WAIT).unwrap();
    socket.send(b"second".to_vec()).unwrap();

    let err = socket
        .send_with_cancel(&after(Duration::from_millis(30)), b"third".to_vec())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    // a disconnected signal cancels immediately
    let (cancel_tx, cancel_rx) = bounded::<()>(0);
    drop(cancel_tx);
    let err = socket
        .send_with_cancel(&cancel_rx, b"third".to_vec())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    drop(gate);
    socket.close(None);
}

#[test]
fn test_batches_queued_objects() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let a = Arc::new(a);
    let (packer, gate, entered) = GatedPacker::new();
    let config = SocketConfig::new()
        .with_send_queue_size(32)
        .with_max_send_block_size(10);
    let (builder, (_, closed)) =
        close_recorder(SocketBuilder::with_codec(a.clone(), Identity, packer).config(config));
    let socket = builder.build();

    let mut expected = Vec::new();
    for i in 0..20u8 {
        let object = vec![b'a' + i; 5];
        expected.extend_from_slice(&object);
        socket.send(object).unwrap();
    }
    entered.recv_timeout(WAIT).unwrap();
    drop(gate);

    let mut received = Vec::new();
    while received.len() < expected.len() {
        let msg = b.recv(Some(Instant::now() + WAIT)).unwrap();
        assert_eq!(msg.len(), 10);
        received.extend_from_slice(&msg);
    }
    assert_eq!(received, expected);
    assert_eq!(a.send_calls(), 10);

    socket.close(None);
    assert!(closed.recv_timeout(WAIT).unwrap().is_none());
}

#[test]
fn test_lone_object_is_flushed_immediately() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let socket = AsyncSocket::builder(a).build();

    socket.send(b"ping".to_vec()).unwrap();
    assert_eq!(b.recv(Some(Instant::now() + WAIT)).unwrap(), b"ping");
    socket.close(None);
}

#[test]
fn test_close_drains_queued_objects() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (packer, gate, entered) = GatedPacker::new();
    let config = SocketConfig::new()
        .with_send_queue_size(32)
        .with_max_send_block_size(16);
    let (builder, (calls, closed)) =
        close_recorder(SocketBuilder::with_codec(a, Identity, packer).config(config));
    let socket = builder.build();

    let mut expected = Vec::new();
    for i in 0..20u8 {
        let object = vec![b'A' + i; 3];
        expected.extend_from_slice(&object);
        socket.send(object).unwrap();
    }
    entered.recv_timeout(WAIT).unwrap();

    socket.close(None);
    assert_eq!(socket.state(), SocketState::Closing);
    let err = socket.send(b"late".to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    drop(gate);

    assert_eq!(read_to_end(&b), expected);
    assert!(closed.recv_timeout(WAIT).unwrap().is_none());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_packet_received_during_close_is_dropped() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let (entered_tx, entered_rx) = unbounded();
    let transport = GatedTransport {
        inner: a,
        gate: gate_rx,
        entered: entered_tx,
    };

    let (packets_tx, packets_rx) = unbounded();
    let (builder, (calls, closed)) = close_recorder(SocketBuilder::new(transport).on_packet(
        move |_, packet| {
            let _ = packets_tx.send(packet);
        },
    ));
    let socket = builder.build();

    socket.recv(None);
    entered_rx.recv_timeout(WAIT).unwrap();

    // the receive task is held inside the transport while the socket closes
    socket.close(None);
    assert_eq!(socket.state(), SocketState::Closing);
    b.send(b"late", None).unwrap();
    drop(gate_tx);

    assert!(closed.recv_timeout(WAIT).unwrap().is_none());
    assert!(packets_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(socket.state(), SocketState::Closed);
}

#[test]
fn test_recv_timeout_closes_by_default() {
    init_logger();
    let (a, _b) = MemoryTransport::pair();
    let (builder, (_, closed)) = close_recorder(AsyncSocket::builder(a));
    let socket = builder.build();

    socket.recv(Some(Instant::now() + Duration::from_millis(50)));
    let reason = closed.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(reason.kind(), ErrorKind::RecvTimeout);
    assert!(reason.is_timeout());
}

#[test]
fn test_custom_recv_timeout_keeps_socket_open() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let timeouts = Arc::new(AtomicUsize::new(0));
    let counter = timeouts.clone();
    let (packets_tx, packets_rx) = unbounded();
    let socket = AsyncSocket::builder(a)
        .on_recv_timeout(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_packet(move |_, packet| {
            let _ = packets_tx.send(packet);
        })
        .build();

    socket.recv(Some(Instant::now() + Duration::from_millis(30)));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(socket.state(), SocketState::Open);

    // the socket still serves later requests
    b.send(b"late", None).unwrap();
    socket.recv(None);
    assert_eq!(packets_rx.recv_timeout(WAIT).unwrap(), b"late");
    socket.close(None);
}

#[test]
fn test_default_handler_keeps_receiving() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (builder, (_, closed)) = close_recorder(AsyncSocket::builder(a));
    let socket = builder.build();

    socket.recv(None);
    b.send(b"one", None).unwrap();
    b.send(b"two", None).unwrap();
    // the peer going away surfaces as a receive error once both are consumed
    b.close();

    let reason = closed.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(reason.kind(), ErrorKind::Io);
    assert_eq!(reason.io_kind(), Some(io::ErrorKind::UnexpectedEof));
}

#[test]
fn test_decode_error_closes() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (builder, (_, closed)) =
        close_recorder(SocketBuilder::with_codec(a, StrictDecoder, Identity));
    let socket = builder.build();

    socket.recv(None);
    b.send(b"!bad", None).unwrap();
    let reason = closed.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(reason.kind(), ErrorKind::Decode);
}

#[test]
fn test_pack_error_closes() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let (builder, (_, closed)) =
        close_recorder(SocketBuilder::with_codec(a, Identity, StrictPacker));
    let socket = builder.build();

    socket.send(b"good".to_vec()).unwrap();
    assert_eq!(b.recv(Some(Instant::now() + WAIT)).unwrap(), b"good");

    socket.send(b"!bad".to_vec()).unwrap();
    let reason = closed.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(reason.kind(), ErrorKind::Encode);
}

#[test]
fn test_stalled_flush_closes_with_async_send_timeout() {
    init_logger();
    let (a, _b) = MemoryTransport::pair_with_capacity(1);
    let config = SocketConfig::new()
        .with_async_send_timeout(Duration::from_millis(50))
        .with_max_send_block_size(1);
    let (builder, (_, closed)) = close_recorder(AsyncSocket::builder(a).config(config));
    let socket = builder.build();

    // the peer never reads: the first write fills the pipe, the second stalls
    socket.send(b"first".to_vec()).unwrap();
    let _ = socket.send(b"second".to_vec());

    let reason = closed.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(reason.kind(), ErrorKind::AsyncSendTimeout);
}

#[test]
fn test_operations_after_close() {
    init_logger();
    let (a, _b) = MemoryTransport::pair();
    let socket = AsyncSocket::builder(a).build();
    socket.close(None);

    let err = socket.send(b"x".to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    let err = socket.try_send(b"x".to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    let err = socket
        .send_deadline(b"x".to_vec(), Instant::now() + Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);

    // dropped silently
    socket.recv(None);
}

#[test]
fn test_user_data_and_addresses() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let peer_addr = b.local_addr().unwrap();
    let socket = AsyncSocket::builder(a).build();

    assert_eq!(socket.remote_addr().unwrap(), peer_addr);
    socket.set_user_data(Arc::new(String::from("session-7")));
    let data = socket.user_data().unwrap();
    assert_eq!(data.downcast_ref::<String>().unwrap(), "session-7");
    assert!(socket.raw_conn().downcast_ref::<MemoryTransport>().is_some());
    socket.close(None);
}
